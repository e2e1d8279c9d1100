//! The shell's variable, alias and working-directory state.
//!
//! This is the state the environment-capture monitor applies into and the
//! exec layer exports to children. It is owned by one executor rather than
//! being process-global, so several shell instances can coexist in one
//! process (and in tests).

use crate::common::cstring;
use crate::null_terminated_array::OwningNullTerminatedArray;
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

/// Variables with this name prefix in a captured child environment are alias
/// definitions rather than plain variables. Child interpreters that want
/// their alias changes propagated export them under this prefix.
pub const ALIAS_VAR_PREFIX: &str = "REMORA_ALIAS_";

pub struct ShellEnv {
    vars: BTreeMap<String, String>,
    aliases: BTreeMap<String, String>,
    cwd: PathBuf,
}

impl ShellEnv {
    /// Construct from the calling process's environment and working
    /// directory.
    pub fn from_process() -> Self {
        let cwd = std::env::current_dir().unwrap_or_else(|_| PathBuf::from("/"));
        let mut env = Self::empty_at(cwd);
        for (name, value) in std::env::vars() {
            env.vars.insert(name, value);
        }
        env
    }

    /// Construct with no variables and the given working directory. Mostly
    /// for tests.
    pub fn empty_at(cwd: impl Into<PathBuf>) -> Self {
        ShellEnv {
            vars: BTreeMap::new(),
            aliases: BTreeMap::new(),
            cwd: cwd.into(),
        }
    }

    pub fn get(&self, name: &str) -> Option<&str> {
        self.vars.get(name).map(|s| s.as_str())
    }

    pub fn set(&mut self, name: impl Into<String>, value: impl Into<String>) {
        self.vars.insert(name.into(), value.into());
    }

    pub fn remove(&mut self, name: &str) -> bool {
        self.vars.remove(name).is_some()
    }

    /// Iterate variables in sorted order.
    pub fn iter(&self) -> impl Iterator<Item = (&str, &str)> {
        self.vars.iter().map(|(k, v)| (k.as_str(), v.as_str()))
    }

    pub fn alias(&self, name: &str) -> Option<&str> {
        self.aliases.get(name).map(|s| s.as_str())
    }

    pub fn set_alias(&mut self, name: impl Into<String>, value: impl Into<String>) {
        self.aliases.insert(name.into(), value.into());
    }

    pub fn aliases(&self) -> impl Iterator<Item = (&str, &str)> {
        self.aliases.iter().map(|(k, v)| (k.as_str(), v.as_str()))
    }

    pub fn cwd(&self) -> &Path {
        &self.cwd
    }

    pub fn set_cwd(&mut self, cwd: impl Into<PathBuf>) {
        self.cwd = cwd.into();
    }

    /// Resolve a redirection or command target against the working directory.
    pub fn apply_working_directory(&self, target: &str) -> PathBuf {
        let path = Path::new(target);
        if path.is_absolute() {
            path.to_path_buf()
        } else {
            self.cwd.join(path)
        }
    }

    /// Build the envp array for exec. Alias definitions ride along under
    /// their reserved prefix so a child interpreter sees them too.
    pub fn export_array(&self) -> OwningNullTerminatedArray {
        let mut strs = Vec::with_capacity(self.vars.len() + self.aliases.len());
        for (name, value) in &self.vars {
            strs.push(cstring(&format!("{name}={value}")));
        }
        for (name, value) in &self.aliases {
            strs.push(cstring(&format!("{ALIAS_VAR_PREFIX}{name}={value}")));
        }
        OwningNullTerminatedArray::new(strs)
    }

    /// Replace the variable set and working directory wholesale with a
    /// captured child state, diff-merging alias definitions: alias entries
    /// that changed or are new are taken over, unchanged ones are left alone,
    /// and aliases the child never mentioned survive.
    pub fn replace_all<I>(&mut self, vars: I, cwd: Option<PathBuf>)
    where
        I: IntoIterator<Item = (String, String)>,
    {
        let mut plain = BTreeMap::new();
        for (name, value) in vars {
            if let Some(alias_name) = name.strip_prefix(ALIAS_VAR_PREFIX) {
                if self.aliases.get(alias_name).map(|v| v.as_str()) != Some(value.as_str()) {
                    self.aliases.insert(alias_name.to_string(), value);
                }
            } else {
                plain.insert(name, value);
            }
        }
        self.vars = plain;
        if let Some(cwd) = cwd {
            self.cwd = cwd;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_replace_all_merges_aliases() {
        let mut env = ShellEnv::empty_at("/tmp");
        env.set("KEEP", "old");
        env.set_alias("ll", "ls -l");
        env.set_alias("gs", "git status");

        env.replace_all(
            vec![
                ("NEW".to_string(), "value".to_string()),
                (format!("{ALIAS_VAR_PREFIX}ll"), "ls -la".to_string()),
                (format!("{ALIAS_VAR_PREFIX}gs"), "git status".to_string()),
            ],
            Some(PathBuf::from("/var")),
        );

        // Plain variables are replaced wholesale.
        assert_eq!(env.get("KEEP"), None);
        assert_eq!(env.get("NEW"), Some("value"));
        // Changed alias taken over, unchanged alias intact.
        assert_eq!(env.alias("ll"), Some("ls -la"));
        assert_eq!(env.alias("gs"), Some("git status"));
        assert_eq!(env.cwd(), Path::new("/var"));
    }

    #[test]
    fn test_apply_working_directory() {
        let env = ShellEnv::empty_at("/home/me");
        assert_eq!(
            env.apply_working_directory("out.txt"),
            PathBuf::from("/home/me/out.txt")
        );
        assert_eq!(
            env.apply_working_directory("/etc/passwd"),
            PathBuf::from("/etc/passwd")
        );
    }
}
