//! Local socket directory: where hosts put their control sockets and where
//! the browser looks for them.

use std::io;
use std::os::unix::fs::FileTypeExt;
use std::path::{Path, PathBuf};

use tournbuddy_types::service::{is_socket_file_name, max_socket_file_name_len};
use tournbuddy_types::Endpoint;
use tracing::{debug, trace, warn};

use crate::error::DiscoveryError;

/// Size of `sockaddr_un.sun_path`, including the trailing NUL.
#[cfg(any(target_os = "linux", target_os = "android"))]
pub const SUN_PATH_MAX: usize = 108;

/// Size of `sockaddr_un.sun_path`, including the trailing NUL.
#[cfg(not(any(target_os = "linux", target_os = "android")))]
pub const SUN_PATH_MAX: usize = 104;

/// Resolve the socket directory, honouring an explicit override first.
pub fn resolve(override_dir: Option<&Path>) -> Result<PathBuf, DiscoveryError> {
    resolve_from(candidates(override_dir))
}

/// Candidate directories in order of preference: the override, the user's
/// runtime and cache directories, `$TMPDIR`, then `/tmp`.
pub fn candidates(override_dir: Option<&Path>) -> Vec<PathBuf> {
    let mut out: Vec<PathBuf> = Vec::new();
    out.extend(override_dir.map(Path::to_path_buf));
    out.extend(dirs::runtime_dir());
    out.extend(dirs::cache_dir());
    out.extend(std::env::var_os("TMPDIR").map(PathBuf::from));
    out.push(PathBuf::from("/tmp"));
    out
}

/// First candidate that exists and leaves room for the longest socket file
/// name within the socket address limit.
pub fn resolve_from<I>(candidates: I) -> Result<PathBuf, DiscoveryError>
where
    I: IntoIterator<Item = PathBuf>,
{
    let mut tried = Vec::new();
    for dir in candidates {
        if fits_socket_address(&dir) && dir.is_dir() {
            debug!(dir = %dir.display(), "resolved socket directory");
            return Ok(dir);
        }
        trace!(dir = %dir.display(), "socket directory candidate rejected");
        tried.push(dir);
    }
    Err(DiscoveryError::DirectoryUnavailable { tried })
}

/// Whether `dir/<longest socket name>` fits in `sun_path` with its NUL.
pub fn fits_socket_address(dir: &Path) -> bool {
    let dir_len = dir.as_os_str().len();
    let needed = dir_len + 1 + max_socket_file_name_len() + 1;
    needed <= SUN_PATH_MAX
}

/// Host control sockets in `dir`, sorted by path.
///
/// Only socket files named like a host socket count; anything else in the
/// directory is ignored.
pub async fn scan(dir: &Path) -> io::Result<Vec<PathBuf>> {
    let mut found = Vec::new();
    let mut entries = tokio::fs::read_dir(dir).await?;
    while let Some(entry) = entries.next_entry().await? {
        let name = entry.file_name();
        let Some(name) = name.to_str() else {
            continue;
        };
        if !is_socket_file_name(name) {
            continue;
        }
        match entry.file_type().await {
            Ok(ty) if ty.is_socket() => found.push(entry.path()),
            Ok(_) => {}
            // Removed between listing and stat.
            Err(e) if e.kind() == io::ErrorKind::NotFound => {}
            Err(e) => return Err(e),
        }
    }
    found.sort();
    Ok(found)
}

/// [`scan`] as local endpoints. A failed scan logs and yields nothing, so
/// the next pass simply tries again.
pub async fn local_endpoints(dir: &Path) -> Vec<Endpoint> {
    match scan(dir).await {
        Ok(paths) => paths.into_iter().map(Endpoint::local).collect(),
        Err(e) => {
            warn!(dir = %dir.display(), error = %e, "socket directory scan failed");
            Vec::new()
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn too_long_candidate_falls_through_to_tmp() {
        let too_long = PathBuf::from(format!("/{}", "d".repeat(SUN_PATH_MAX)));
        let dir = resolve_from([too_long, PathBuf::from("/tmp")]).unwrap();
        assert_eq!(dir, PathBuf::from("/tmp"));
    }

    #[test]
    fn length_check_is_exact() {
        let name_len = max_socket_file_name_len();
        // "/" + filler + "/" + name + NUL == SUN_PATH_MAX
        let filler = SUN_PATH_MAX - name_len - 3;
        let fits = PathBuf::from(format!("/{}", "a".repeat(filler)));
        let over = PathBuf::from(format!("/{}", "a".repeat(filler + 1)));
        assert!(fits_socket_address(&fits));
        assert!(!fits_socket_address(&over));
    }

    #[test]
    fn missing_directories_are_skipped() {
        let tmp = tempfile::tempdir().unwrap();
        let missing = tmp.path().join("nope");
        let dir = resolve_from([missing, tmp.path().to_path_buf()]).unwrap();
        assert_eq!(dir, tmp.path());
    }

    #[test]
    fn nothing_usable_reports_every_candidate() {
        let tmp = tempfile::tempdir().unwrap();
        let err = resolve_from([tmp.path().join("a"), tmp.path().join("b")]).unwrap_err();
        match err {
            DiscoveryError::DirectoryUnavailable { tried } => assert_eq!(tried.len(), 2),
            other => panic!("unexpected error {other:?}"),
        }
    }

    #[test]
    fn override_comes_first() {
        let list = candidates(Some(Path::new("/srv/tb")));
        assert_eq!(list[0], PathBuf::from("/srv/tb"));
        assert_eq!(list.last(), Some(&PathBuf::from("/tmp")));
    }

    #[tokio::test]
    async fn scan_lists_only_host_sockets() {
        let tmp = tempfile::tempdir().unwrap();
        let b = tmp.path().join("tournamentd.200.sock");
        let a = tmp.path().join("tournamentd.100.sock");
        let _lb = std::os::unix::net::UnixListener::bind(&b).unwrap();
        let _la = std::os::unix::net::UnixListener::bind(&a).unwrap();
        // Right name, but a regular file.
        std::fs::write(tmp.path().join("tournamentd.300.sock"), b"").unwrap();
        // Socket, wrong name.
        let _other = std::os::unix::net::UnixListener::bind(tmp.path().join("other.sock")).unwrap();

        assert_eq!(scan(tmp.path()).await.unwrap(), vec![a.clone(), b.clone()]);
        assert_eq!(
            local_endpoints(tmp.path()).await,
            vec![Endpoint::local(a), Endpoint::local(b)]
        );
    }

    #[tokio::test]
    async fn failed_scan_is_empty() {
        let tmp = tempfile::tempdir().unwrap();
        assert!(local_endpoints(&tmp.path().join("gone")).await.is_empty());
    }
}
