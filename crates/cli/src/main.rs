//! arcfs mounts an archive or compressed file (foo.tar, foo.tar.gz,
//! foo.zip, foo.xz, ...) as a read-only FUSE filesystem.
//!
//! ```text
//! arcfs archive.zip the/mount/point
//! ls -l             the/mount/point
//! fusermount -u     the/mount/point
//! ```

use std::io::IsTerminal;
use std::path::PathBuf;
use std::sync::Arc;

use clap::Parser;
use fuser::MountOption;
use tracing_subscriber::filter::LevelFilter;

use arcfs_codec::{OpenOptions, PassphraseProvider};
use arcfs_common::{innername, ExitCode, Redactor};
use arcfs_vfs::{ArchiveFs, MountConfig, Probe, ReaderCache};

/// Mount options accepted for command-line compatibility with other
/// archive mounters and otherwise ignored. Raw archives are detected
/// automatically and every mount is read-only, so these carry no
/// information here.
const DISCARDED_OPTIONS: [&str; 5] = ["passphrase", "formatraw", "nobackup", "nosave", "readonly"];

#[derive(Parser)]
#[command(name = "arcfs", version, about = "Mount an archive file as a read-only filesystem")]
struct Cli {
    /// Archive file to mount
    archive: PathBuf,

    /// Mount point; defaults to the archive name minus its extension
    mount_point: Option<PathBuf>,

    /// Do not print progress messages
    #[arg(short, long)]
    quiet: bool,

    /// Print more log messages
    #[arg(short, long)]
    verbose: bool,

    /// Redact pathnames from log messages
    #[arg(long)]
    redact: bool,

    /// Mount options, comma separated (uid= and gid= are honoured)
    #[arg(short = 'o', value_name = "OPTIONS", value_delimiter = ',')]
    options: Vec<String>,

    /// Accepted for compatibility and ignored; the passphrase is read
    /// from standard input when the archive needs one
    #[arg(long, hide = true)]
    passphrase: Option<String>,
}

fn main() {
    std::process::exit(run());
}

fn run() -> i32 {
    let cli: Cli = Cli::parse();

    let level: LevelFilter = if cli.quiet {
        LevelFilter::ERROR
    } else if cli.verbose {
        LevelFilter::DEBUG
    } else {
        LevelFilter::INFO
    };
    tracing_subscriber::fmt()
        .with_max_level(level)
        .with_writer(std::io::stderr)
        .init();

    if cli.passphrase.is_some() {
        tracing::debug!("ignoring --passphrase; passphrases are read from standard input");
    }

    let redact: bool = cli.redact || cli.options.iter().any(|o| o == "redact");
    let redactor: Redactor = Redactor::new(redact);
    let archive_name: Arc<str> = Arc::from(cli.archive.to_string_lossy().as_ref());

    // The FUSE session may change the working directory, so every later
    // open of the archive must use an absolute path.
    let archive_realpath: PathBuf = match cli.archive.canonicalize() {
        Ok(path) => path,
        Err(e) => {
            tracing::error!(
                "could not get absolute path of {}: {}",
                redactor.path(&archive_name),
                e
            );
            return ExitCode::CannotOpenArchive.code();
        }
    };

    let mut config: MountConfig = MountConfig::default()
        .with_quiet(cli.quiet)
        .with_redact(redact);
    let mount_options: Vec<MountOption> = kernel_mount_options(&cli.options, &mut config);

    let passphrase = PassphraseProvider::with_prompt(prompt_for_passphrase).shared();
    let options: OpenOptions = OpenOptions::new(archive_realpath)
        .with_passphrase(passphrase)
        .with_block_size(config.block_size);

    let stem: String = innername(&cli.archive);
    let probe: Probe = match Probe::run(&options, archive_name.clone(), stem.clone(), &config) {
        Ok(probe) => probe,
        Err(e) => {
            tracing::error!("{}", e.message);
            return e.exit_code.code();
        }
    };

    // The archive is sound; now the mount point can be set up, before
    // the (possibly long) full scan runs.
    let mut guard: MountPointGuard = MountPointGuard { created: None };
    let mount_point: PathBuf = match resolve_mount_point(cli.mount_point, &stem, redactor, &mut guard)
    {
        Ok(path) => path,
        Err(code) => return code,
    };

    let built = match probe.build_tree() {
        Ok(built) => built,
        Err(e) => {
            tracing::error!("{}", e.message);
            return e.exit_code.code();
        }
    };

    let readers: ReaderCache = ReaderCache::new(options, archive_name.clone(), redactor);
    let fs: ArchiveFs = ArchiveFs::new(built, readers, &config);

    // Single-threaded by design: one session loop serves every request,
    // so the engine state needs no locks.
    if let Err(e) = fuser::mount2(fs, &mount_point, &mount_options) {
        tracing::error!(
            "could not mount {} on {}: {}",
            redactor.path(&archive_name),
            redactor.path(&mount_point.to_string_lossy()),
            e
        );
        return ExitCode::GenericFailure.code();
    }

    drop(guard);
    0
}

/// Read the passphrase from standard input, suppressing echo when it is
/// a terminal.
fn prompt_for_passphrase() -> Option<String> {
    if std::io::stdin().is_terminal() {
        rpassword::prompt_password("Password > ").ok()
    } else {
        let mut line: String = String::new();
        match std::io::BufRead::read_line(&mut std::io::stdin().lock(), &mut line) {
            Ok(0) | Err(_) => None,
            Ok(_) => Some(line),
        }
    }
}

/// Removes the mount point directory on exit if this process created it.
struct MountPointGuard {
    created: Option<PathBuf>,
}

impl Drop for MountPointGuard {
    fn drop(&mut self) {
        if let Some(path) = self.created.take() {
            match std::fs::remove_dir(&path) {
                Ok(()) => tracing::debug!("removed mount point {}", path.display()),
                Err(e) => {
                    tracing::error!("cannot remove mount point {}: {}", path.display(), e)
                }
            }
        }
    }
}

/// Resolve the mount point: use the given directory (creating it when
/// missing), or derive one from the archive stem, appending ` (1)`,
/// ` (2)`, ... until a fresh directory can be created.
fn resolve_mount_point(
    given: Option<PathBuf>,
    stem: &str,
    redactor: Redactor,
    guard: &mut MountPointGuard,
) -> Result<PathBuf, i32> {
    if let Some(path) = given {
        match std::fs::create_dir(&path) {
            Ok(()) => {
                tracing::debug!("created mount point {}", redactor.path(&path.to_string_lossy()));
                guard.created = Some(path.clone());
            }
            Err(e) if e.kind() == std::io::ErrorKind::AlreadyExists => {
                tracing::debug!(
                    "mount point {} already exists",
                    redactor.path(&path.to_string_lossy())
                );
            }
            Err(e) => {
                tracing::error!(
                    "cannot create mount point {}: {}",
                    redactor.path(&path.to_string_lossy()),
                    e
                );
                return Err(ExitCode::GenericFailure.code());
            }
        }
        return Ok(path);
    }

    let base: &str = if stem.is_empty() { "mount" } else { stem };
    let mut attempt: u32 = 0;
    loop {
        let name: String = if attempt == 0 {
            base.to_string()
        } else {
            format!("{base} ({attempt})")
        };
        let path: PathBuf = PathBuf::from(&name);
        match std::fs::create_dir(&path) {
            Ok(()) => {
                tracing::info!("created mount point {}", redactor.path(&name));
                guard.created = Some(path.clone());
                return Ok(path);
            }
            Err(e) if e.kind() == std::io::ErrorKind::AlreadyExists => {
                tracing::debug!("mount point {} already exists", redactor.path(&name));
                attempt += 1;
            }
            Err(e) => {
                tracing::error!("cannot create mount point {}: {}", redactor.path(&name), e);
                return Err(ExitCode::GenericFailure.code());
            }
        }
    }
}

/// Translate `-o` values into kernel mount options, folding `uid=` and
/// `gid=` into the engine config and dropping compatibility words.
fn kernel_mount_options(raw: &[String], config: &mut MountConfig) -> Vec<MountOption> {
    let mut options: Vec<MountOption> = vec![
        MountOption::RO,
        MountOption::FSName("arcfs".to_string()),
    ];
    for option in raw {
        if option.is_empty() || option == "redact" {
            continue;
        }
        if DISCARDED_OPTIONS.contains(&option.as_str())
            || DISCARDED_OPTIONS
                .iter()
                .any(|key| option.starts_with(&format!("{key}=")))
        {
            tracing::debug!("ignoring compatibility mount option {option}");
            continue;
        }
        if let Some(uid) = option.strip_prefix("uid=") {
            if let Ok(uid) = uid.parse::<u32>() {
                config.uid = uid;
            }
            continue;
        }
        if let Some(gid) = option.strip_prefix("gid=") {
            if let Ok(gid) = gid.parse::<u32>() {
                config.gid = gid;
            }
            continue;
        }
        match option.as_str() {
            "ro" => {}
            "allow_other" => options.push(MountOption::AllowOther),
            "allow_root" => options.push(MountOption::AllowRoot),
            "auto_unmount" => options.push(MountOption::AutoUnmount),
            other => options.push(MountOption::CUSTOM(other.to_string())),
        }
    }
    options
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_kernel_mount_options_always_read_only() {
        let mut config: MountConfig = MountConfig::default();
        let options: Vec<MountOption> = kernel_mount_options(&[], &mut config);
        assert!(options.contains(&MountOption::RO));
    }

    #[test]
    fn test_uid_gid_fold_into_config() {
        let mut config: MountConfig = MountConfig::default();
        let raw: Vec<String> = vec!["uid=1234".to_string(), "gid=5678".to_string()];
        let options: Vec<MountOption> = kernel_mount_options(&raw, &mut config);
        assert_eq!(config.uid, 1234);
        assert_eq!(config.gid, 5678);
        // Folded options are not forwarded to the kernel.
        assert_eq!(options.len(), 2);
    }

    #[test]
    fn test_compatibility_options_are_dropped() {
        let mut config: MountConfig = MountConfig::default();
        let raw: Vec<String> = vec![
            "formatraw".to_string(),
            "nobackup".to_string(),
            "passphrase=abc".to_string(),
            "allow_other".to_string(),
        ];
        let options: Vec<MountOption> = kernel_mount_options(&raw, &mut config);
        assert_eq!(options.len(), 3);
        assert!(options.contains(&MountOption::AllowOther));
    }
}
