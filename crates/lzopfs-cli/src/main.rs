//! `lzopfs` — mount one or more LZOP-family archives as a read-only FUSE
//! filesystem of their decompressed contents.
//!
//! The argument convention (§6, confirmed against
//! `examples/original_source/lzopfs.cc`'s `lf_opt_proc`) can't be expressed
//! as ordinary derived flags: every non-option positional argument is
//! provisionally a source archive *until the next* positional argument
//! shows up, at which point the previous one is registered and scanning
//! continues. The last positional argument is never registered — it (plus
//! any options around it) is passed straight through to the FUSE mount
//! call. So this crate's own flags are declared with `clap::Parser` as
//! usual, but the archive/mountpoint split is done by hand over
//! `std::env::args_os()`, the same way the original's `fuse_opt_parse`
//! callback inspects each argument as it arrives.

use clap::Parser;
use humansize::{format_size, BINARY};
use lzopfs_core::error::Error;
use lzopfs_fuse::Lzopfs;
use std::ffi::{OsStr, OsString};
use std::path::PathBuf;
use std::process::ExitCode;
use tracing::metadata::LevelFilter;
use tracing_subscriber::EnvFilter;

#[global_allocator]
static ALLOC: tikv_jemallocator::Jemalloc = tikv_jemallocator::Jemalloc;

/// Flags this crate defines itself. Parsed from a pre-filtered argument
/// list (every source-archive positional stripped out by
/// [`split_args`]), so `clap` never sees the alternating convention.
#[derive(Debug, clap::Parser)]
#[command(author, version, about, long_about = None)]
struct Cli {
    /// Upper bound on total resident decompressed block bytes
    ///
    /// Accepts a plain byte count or a human size like `32M` / `1G`.
    #[arg(long, default_value = "32M")]
    cache_size: String,

    /// Run in the foreground instead of daemonizing
    #[arg(short, long)]
    foreground: bool,

    /// Force a full rescan of every archive, ignoring any sidecar index
    #[arg(long)]
    rebuild_index: bool,

    #[arg(short, long, action = clap::ArgAction::Count)]
    verbose: u8,

    #[arg(short, long, action = clap::ArgAction::Count, conflicts_with = "verbose")]
    quiet: u8,

    /// Everything left after archive paths are split out: the mountpoint
    /// plus any raw FUSE mount options
    #[arg(trailing_var_arg = true, allow_hyphen_values = true)]
    mount_args: Vec<OsString>,
}

impl Cli {
    fn level_filter(&self) -> LevelFilter {
        match i16::from(self.verbose) - i16::from(self.quiet) {
            ..=-1 => LevelFilter::ERROR,
            0 => LevelFilter::WARN,
            1 => LevelFilter::INFO,
            2 => LevelFilter::DEBUG,
            3.. => LevelFilter::TRACE,
        }
    }
}

/// Splits `raw` (normally `std::env::args_os()` minus argv[0]) into source
/// archive paths and the remaining arguments to hand to `clap`/FUSE.
///
/// Every non-option argument is provisionally a source path until the next
/// non-option argument is seen; at that point it's committed to `archives`.
/// The last non-option argument is never committed — it stays in
/// `remainder` along with every option around it, since it's the
/// mountpoint.
fn split_args(raw: Vec<OsString>) -> (Vec<PathBuf>, Vec<OsString>) {
    let mut archives = Vec::new();
    let mut remainder = Vec::new();
    let mut pending: Option<OsString> = None;

    let is_option = |arg: &OsStr| arg.to_str().is_some_and(|s| s.starts_with('-') && s != "-");

    for arg in raw {
        if is_option(&arg) {
            remainder.push(arg);
            continue;
        }
        if let Some(prev) = pending.replace(arg) {
            archives.push(PathBuf::from(prev));
        }
    }
    if let Some(last) = pending {
        remainder.push(last);
    }
    (archives, remainder)
}

fn parse_cache_size(s: &str) -> Result<u64, String> {
    let s = s.trim();
    let (digits, mult) = match s.chars().last() {
        Some(c) if c.eq_ignore_ascii_case(&'g') => (&s[..s.len() - 1], 1024 * 1024 * 1024),
        Some(c) if c.eq_ignore_ascii_case(&'m') => (&s[..s.len() - 1], 1024 * 1024),
        Some(c) if c.eq_ignore_ascii_case(&'k') => (&s[..s.len() - 1], 1024),
        _ => (s, 1),
    };
    digits
        .trim()
        .parse::<u64>()
        .map(|n| n * mult)
        .map_err(|e| format!("invalid cache size {s:?}: {e}"))
}

fn register_archives(paths: &[PathBuf], rebuild_index: bool) -> Result<lzopfs_core::FileList, Error> {
    let mut list = lzopfs_core::FileList::new();
    for path in paths {
        let kind = lzopfs_core::Kind::detect(path).ok_or_else(|| {
            Error::format(path.display().to_string(), "unrecognized archive format")
        })?;

        if rebuild_index {
            let sidecar_suffix = kind.index_suffix();
            let mut sidecar = path.clone().into_os_string();
            sidecar.push(sidecar_suffix);
            let _ = std::fs::remove_file(&sidecar);
        }

        let compressed =
            lzopfs_core::index::initialize(path, kind, lzopfs_core::DEFAULT_MAX_BLOCK)?;
        let (_, name) = list.add(compressed);
        tracing::info!(path = %path.display(), name, "registered archive");
    }
    Ok(list)
}

fn main() -> ExitCode {
    let raw: Vec<OsString> = std::env::args_os().skip(1).collect();
    let (archive_paths, remainder) = split_args(raw);

    let mut full_args = vec![OsString::from("lzopfs")];
    full_args.extend(remainder);
    let cli = Cli::parse_from(full_args);

    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::builder()
                .with_default_directive(cli.level_filter().into())
                .from_env_lossy(),
        )
        .with_writer(std::io::stderr)
        .init();

    if archive_paths.is_empty() {
        eprintln!("lzopfs: no archive paths given");
        return ExitCode::FAILURE;
    }
    let Some((mountpoint, fuse_options)) = cli.mount_args.split_last() else {
        eprintln!("lzopfs: no mountpoint given");
        return ExitCode::FAILURE;
    };

    let cache_size = match parse_cache_size(&cli.cache_size) {
        Ok(n) => n,
        Err(e) => {
            eprintln!("lzopfs: {e}");
            return ExitCode::FAILURE;
        }
    };

    let files = match register_archives(&archive_paths, cli.rebuild_index) {
        Ok(files) => files,
        Err(e) => {
            eprintln!("lzopfs: {e}");
            return ExitCode::FAILURE;
        }
    };

    let fs = Lzopfs::new(files, cache_size);

    let mut mount_options = vec![fuser::MountOption::RO, fuser::MountOption::FSName("lzopfs".to_string())];
    mount_options.extend(fuse_options.iter().filter_map(|opt| {
        opt.to_str()
            .filter(|s| *s != "-o")
            .map(|s| fuser::MountOption::CUSTOM(s.to_string()))
    }));

    if !cli.foreground {
        tracing::warn!("daemonizing is not implemented; running in the foreground");
    }

    let mountpoint = PathBuf::from(mountpoint);
    tracing::info!(
        mountpoint = %mountpoint.display(),
        cache_size = %format_size(cache_size, BINARY),
        "mounting"
    );
    match fuser::mount2(fs, &mountpoint, &mount_options) {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            eprintln!("lzopfs: mount failed: {e}");
            ExitCode::FAILURE
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    fn os(args: &[&str]) -> Vec<OsString> {
        args.iter().map(OsString::from).collect()
    }

    /// A minimal valid LZOP archive with a single stored block, just enough
    /// for `register_archives` to detect, scan, and register it.
    fn write_archive(path: &std::path::Path, payload: &[u8]) {
        let mut buf = Vec::new();
        buf.extend_from_slice(&lzopfs_core::format::lzop::MAGIC);

        let header_start = buf.len();
        buf.extend_from_slice(&1u16.to_be_bytes());
        buf.extend_from_slice(&0x1040u16.to_be_bytes());
        buf.extend_from_slice(&0x1010u16.to_be_bytes());
        buf.push(1);
        buf.push(5);
        buf.extend_from_slice(&0u32.to_be_bytes());
        buf.extend_from_slice(&[0u8; 12]);
        buf.push(0);

        let header_bytes = buf[header_start..].to_vec();
        let cksum = adler::adler32_slice(&header_bytes);
        buf.extend_from_slice(&cksum.to_be_bytes());

        buf.extend_from_slice(&(payload.len() as u32).to_be_bytes());
        buf.extend_from_slice(&(payload.len() as u32).to_be_bytes());
        buf.extend_from_slice(payload);
        buf.extend_from_slice(&0u32.to_be_bytes());

        std::fs::File::create(path).unwrap().write_all(&buf).unwrap();
    }

    #[test]
    fn register_archives_detects_and_names_entries() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("payload.lzo");
        write_archive(&path, b"hello world");

        let files = register_archives(&[path], false).unwrap();
        let (_, file) = files.find("payload").expect("registered under stripped name");
        assert_eq!(file.uncompressed_size(), 11);
    }

    #[test]
    fn single_archive_then_mountpoint() {
        let (archives, remainder) = split_args(os(&["a.lzo", "/mnt"]));
        assert_eq!(archives, vec![PathBuf::from("a.lzo")]);
        assert_eq!(remainder, os(&["/mnt"]));
    }

    #[test]
    fn multiple_archives_last_positional_is_mountpoint() {
        let (archives, remainder) = split_args(os(&["a.lzo", "b.lzo", "c.lzo", "/mnt"]));
        assert_eq!(
            archives,
            vec![PathBuf::from("a.lzo"), PathBuf::from("b.lzo"), PathBuf::from("c.lzo")]
        );
        assert_eq!(remainder, os(&["/mnt"]));
    }

    #[test]
    fn options_pass_through_untouched() {
        let (archives, remainder) = split_args(os(&["-v", "a.lzo", "-o", "allow_other", "/mnt"]));
        assert_eq!(archives, vec![PathBuf::from("a.lzo")]);
        assert_eq!(remainder, os(&["-v", "-o", "allow_other", "/mnt"]));
    }

    #[test]
    fn no_archives_only_mountpoint() {
        let (archives, remainder) = split_args(os(&["/mnt"]));
        assert!(archives.is_empty());
        assert_eq!(remainder, os(&["/mnt"]));
    }

    #[test]
    fn cache_size_parsing() {
        assert_eq!(parse_cache_size("32M").unwrap(), 32 * 1024 * 1024);
        assert_eq!(parse_cache_size("1G").unwrap(), 1024 * 1024 * 1024);
        assert_eq!(parse_cache_size("512").unwrap(), 512);
        assert!(parse_cache_size("abc").is_err());
    }
}
