//! File shares: the request handler the daemon plugs into the HTTP core.

pub mod handler;

pub use handler::{ShareBody, ShareHandler};

use crate::config::ShareConfig;

/// Finds the share with the longest mount that prefixes `path` on a
/// segment boundary. Returns the share and the remainder of the path
/// (empty or starting with `/`).
///
/// # Example
///
/// ```ignore
/// // mounts "/" and "/pub"
/// resolve(&shares, "/pub/a.txt") // => ("/pub", "/a.txt")
/// resolve(&shares, "/public")    // => ("/", "/public")
/// ```
pub fn resolve<'a, 'p>(
    shares: &'a [ShareConfig],
    path: &'p str,
) -> Option<(&'a ShareConfig, &'p str)> {
    shares
        .iter()
        .filter_map(|share| {
            let mount = share.mount.trim_end_matches('/');
            let rest = path.strip_prefix(mount)?;
            (rest.is_empty() || rest.starts_with('/')).then_some((share, mount.len(), rest))
        })
        .max_by_key(|(_, len, _)| *len)
        .map(|(share, _, rest)| (share, rest))
}

/// True when a decoded path could leave its share root.
pub fn is_unsafe_path(path: &str) -> bool {
    path.contains('\0') || path.split(['/', '\\']).any(|segment| segment == "..")
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::Access;

    fn share(mount: &str) -> ShareConfig {
        ShareConfig {
            mount: mount.to_string(),
            path: "/srv".into(),
            read: Access::Anonymous,
            write: Access::Denied,
        }
    }

    #[test]
    fn longest_mount_wins() {
        let shares = vec![share("/"), share("/pub"), share("/pub/deep/")];

        let (found, rest) = resolve(&shares, "/pub/a.txt").unwrap();
        assert_eq!(found.mount, "/pub");
        assert_eq!(rest, "/a.txt");

        let (found, rest) = resolve(&shares, "/pub/deep/x").unwrap();
        assert_eq!(found.mount, "/pub/deep/");
        assert_eq!(rest, "/x");

        let (found, rest) = resolve(&shares, "/public").unwrap();
        assert_eq!(found.mount, "/");
        assert_eq!(rest, "/public");
    }

    #[test]
    fn no_share_matches() {
        let shares = vec![share("/pub")];
        assert!(resolve(&shares, "/private/x").is_none());
    }

    #[test]
    fn dot_dot_segments_are_unsafe() {
        assert!(is_unsafe_path("/a/../b"));
        assert!(is_unsafe_path(".."));
        assert!(!is_unsafe_path("/a/..b/c"));
    }
}
