/// Environment hygiene for sandboxed children
///
/// Children start from an empty environment; only the deterministic set below
/// (plus policy extras that pass the loader filter) is passed through.
use std::path::Path;

/// Loader-abuse variables that are never forwarded.
const FORBIDDEN_PREFIXES: &[&str] = &["LD_", "GCONV_", "MALLOC_"];

/// Environment sanitization policy
#[derive(Debug, Clone)]
pub struct EnvPolicy {
    pub path: String,
    pub locale: String,
    /// Additional variables requested by the toolchain adapter
    pub extra: Vec<(String, String)>,
}

impl Default for EnvPolicy {
    fn default() -> Self {
        EnvPolicy {
            path: "/usr/local/bin:/usr/bin:/bin".to_string(),
            locale: "C.UTF-8".to_string(),
            extra: Vec::new(),
        }
    }
}

impl EnvPolicy {
    /// Environment for a child whose home and temp space is `workdir`.
    pub fn sandbox_environment(&self, workdir: &Path) -> Vec<(String, String)> {
        let workdir = workdir.to_string_lossy().into_owned();
        let mut env = vec![
            ("PATH".to_string(), self.path.clone()),
            ("HOME".to_string(), workdir.clone()),
            ("TMPDIR".to_string(), workdir),
            ("LANG".to_string(), self.locale.clone()),
            ("LC_ALL".to_string(), self.locale.clone()),
        ];

        for (key, value) in &self.extra {
            if is_forbidden(key) {
                log::warn!("Dropping loader-sensitive environment variable: {}", key);
                continue;
            }
            env.retain(|(existing, _)| existing != key);
            env.push((key.clone(), value.clone()));
        }

        env
    }
}

pub fn is_forbidden(key: &str) -> bool {
    key.is_empty()
        || key.contains('=')
        || key.contains('\0')
        || FORBIDDEN_PREFIXES.iter().any(|p| key.starts_with(p))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_environment_is_deterministic() {
        let policy = EnvPolicy::default();
        let a = policy.sandbox_environment(Path::new("/tmp/run-a"));
        let b = policy.sandbox_environment(Path::new("/tmp/run-a"));
        assert_eq!(a, b);
        assert!(a.iter().any(|(k, v)| k == "HOME" && v == "/tmp/run-a"));
        assert!(a.iter().any(|(k, v)| k == "LC_ALL" && v == "C.UTF-8"));
    }

    #[test]
    fn test_loader_variables_are_dropped() {
        let policy = EnvPolicy {
            extra: vec![
                ("LD_PRELOAD".into(), "/tmp/evil.so".into()),
                ("GCC_COLORS".into(), "".into()),
                ("PATH".into(), "/opt/gcc/bin".into()),
            ],
            ..EnvPolicy::default()
        };
        let env = policy.sandbox_environment(Path::new("/tmp/run"));
        assert!(env.iter().all(|(k, _)| !k.starts_with("LD_")));
        assert!(env.iter().any(|(k, _)| k == "GCC_COLORS"));
        let paths: Vec<_> = env.iter().filter(|(k, _)| k == "PATH").collect();
        assert_eq!(paths.len(), 1);
        assert_eq!(paths[0].1, "/opt/gcc/bin");
    }
}
