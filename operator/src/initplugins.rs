use crate::{Error, Result};
use lazy_static::lazy_static;
use regex::Regex;
use serde_json::{json, Value};
use std::collections::BTreeMap;
use url::Url;

/// Flat string-keyed parameter map, as declared on the CodeServer spec
pub type Params = BTreeMap<String, String>;

type Constructor = fn(&Params) -> Result<InitPlugin>;

/// Fields the reconciler injects into every plugin's parameter map
pub struct CommonFields {
    pub image: String,
    pub volume_name: String,
}

lazy_static! {
    /// Immutable registration table, built once at process start
    static ref PLUGINS: BTreeMap<&'static str, Constructor> = BTreeMap::from([
        ("git", GitPlugin::parse as Constructor),
        ("copyHome", CopyHomePlugin::parse as Constructor),
        ("copyDefaultConfig", CopyDefaultConfigPlugin::parse as Constructor),
    ]);
    static ref SCHEME: Regex = Regex::new(r"^[A-Za-z][A-Za-z0-9+.-]*://").unwrap();
}

/// A named, parameterized step preparing the home volume before code-server
/// starts. Closed variant set: adding a plugin means a new variant plus a
/// `PLUGINS` entry.
pub enum InitPlugin {
    Git(GitPlugin),
    CopyHome(CopyHomePlugin),
    CopyDefaultConfig(CopyDefaultConfigPlugin),
}

impl InitPlugin {
    /// Renders the init-container description for this step
    #[must_use]
    pub fn init_container(&self) -> Value {
        match self {
            InitPlugin::Git(p) => p.init_container(),
            InitPlugin::CopyHome(p) => p.init_container(),
            InitPlugin::CopyDefaultConfig(p) => p.init_container(),
        }
    }
}

fn required(params: &Params, plugin: &str, key: &str) -> Result<String> {
    params.get(key).cloned().ok_or_else(|| Error::MissingRequiredField {
        plugin: plugin.to_string(),
        field: key.to_string(),
    })
}

fn optional(params: &Params, key: &str) -> String {
    params.get(key).cloned().unwrap_or_default()
}

/// Clones the configured repository into the work directory on first run,
/// then runs the declared init command inside it. Subsequent runs detect the
/// populated work directory and skip both.
pub struct GitPlugin {
    repourl: String,
    branch: String,
    init_command: String,
    volume_name: String,
}

impl GitPlugin {
    fn parse(params: &Params) -> Result<InitPlugin> {
        Ok(InitPlugin::Git(GitPlugin {
            repourl: coerce_https(&required(params, "git", "repourl")?)?,
            branch: optional(params, "branch"),
            init_command: optional(params, "initCommand"),
            volume_name: required(params, "git", "volumeName")?,
        }))
    }

    fn init_container(&self) -> Value {
        let clone = if self.branch.is_empty() {
            format!("git clone {} /persistent/work", self.repourl)
        } else {
            format!("git clone -b {} {} /persistent/work", self.branch, self.repourl)
        };
        let first_run = if self.init_command.is_empty() {
            clone
        } else {
            format!("{clone} && cd /persistent/work && {}", self.init_command)
        };
        let script = format!(
            "if [ ! -d /persistent/work ]; then mkdir -p /persistent/work && {first_run}; else echo 'work directory already exists'; fi"
        );
        json!({
            "name": "git",
            "image": "alpine/git",
            "command": ["sh", "-c", script],
            "volumeMounts": [{"name": self.volume_name, "mountPath": "/persistent"}],
        })
    }
}

/// Seeds the persistent volume with the image's home directory, leaving
/// already-present files alone and excluding the two config subdirectories
/// that other plugins manage.
pub struct CopyHomePlugin {
    image: String,
    volume_name: String,
}

impl CopyHomePlugin {
    fn parse(params: &Params) -> Result<InitPlugin> {
        Ok(InitPlugin::CopyHome(CopyHomePlugin {
            image: required(params, "copyHome", "image")?,
            volume_name: required(params, "copyHome", "volumeName")?,
        }))
    }

    fn init_container(&self) -> Value {
        let script = "sudo apt install -y rsync && sudo rsync -a --ignore-existing --exclude='.local' --exclude='.config' /home/coder/ /persistent/";
        json!({
            "name": "copy-home",
            "image": self.image,
            "command": ["sh", "-c", script],
            "volumeMounts": [{"name": self.volume_name, "mountPath": "/persistent"}],
        })
    }
}

/// Copies the image's default `.local` config directory into the persistent
/// volume, only when absent.
pub struct CopyDefaultConfigPlugin {
    image: String,
    volume_name: String,
}

impl CopyDefaultConfigPlugin {
    fn parse(params: &Params) -> Result<InitPlugin> {
        Ok(InitPlugin::CopyDefaultConfig(CopyDefaultConfigPlugin {
            image: required(params, "copyDefaultConfig", "image")?,
            volume_name: required(params, "copyDefaultConfig", "volumeName")?,
        }))
    }

    fn init_container(&self) -> Value {
        let script = "if [ ! -d /persistent/.local ]; then cp -r /home/coder/.local /persistent/ && echo 'copied .local'; else echo '.local directory already exists'; fi";
        json!({
            "name": "copy-default-config",
            "image": self.image,
            "command": ["sh", "-c", script],
            "volumeMounts": [{"name": self.volume_name, "mountPath": "/persistent"}],
        })
    }
}

/// Repository access goes over https regardless of the declared scheme
fn coerce_https(raw: &str) -> Result<String> {
    let rest = SCHEME.replace(raw, "");
    let secure = format!("https://{rest}");
    Url::parse(&secure).map_err(|_| Error::InvalidRepoUrl(raw.to_string()))?;
    Ok(secure)
}

/// Resolves every declared plugin and renders its init container. The first
/// unknown name or validation failure aborts the whole call with no
/// containers at all.
///
/// Init-container order affects workload startup, so ordering is fixed: the
/// git checkout renders first, remaining plugins follow in name order.
pub fn create_plugins(declared: &BTreeMap<String, Params>, common: &CommonFields) -> Result<Vec<Value>> {
    let mut ordered: Vec<(&String, &Params)> = declared.iter().collect();
    ordered.sort_by_key(|(name, _)| (*name != "git", (*name).clone()));

    let mut containers = Vec::with_capacity(ordered.len());
    for (name, declared_params) in ordered {
        let mut params = declared_params.clone();
        params.insert("image".to_string(), common.image.clone());
        params.insert("volumeName".to_string(), common.volume_name.clone());

        let constructor = PLUGINS
            .get(name.as_str())
            .ok_or_else(|| Error::PluginNotFound(name.clone()))?;
        let plugin = constructor(&params)?;
        containers.push(plugin.init_container());
    }
    Ok(containers)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn common() -> CommonFields {
        CommonFields {
            image: "img:tag".to_string(),
            volume_name: "home".to_string(),
        }
    }

    fn declared(entries: &[(&str, &[(&str, &str)])]) -> BTreeMap<String, Params> {
        entries
            .iter()
            .map(|(name, params)| {
                (
                    name.to_string(),
                    params
                        .iter()
                        .map(|(k, v)| (k.to_string(), v.to_string()))
                        .collect(),
                )
            })
            .collect()
    }

    #[test]
    fn test_git_requires_repourl() {
        let result = create_plugins(&declared(&[("git", &[])]), &common());
        assert!(matches!(
            result,
            Err(Error::MissingRequiredField { ref plugin, ref field }) if plugin == "git" && field == "repourl"
        ));
    }

    #[test]
    fn test_unknown_plugin_aborts_whole_call() {
        let cfg = declared(&[("copyHome", &[]), ("teleport", &[])]);
        let result = create_plugins(&cfg, &common());
        assert!(matches!(result, Err(Error::PluginNotFound(ref name)) if name == "teleport"));
    }

    #[test]
    fn test_git_coerces_scheme_to_https() {
        let cfg = declared(&[("git", &[("repourl", "http://github.com/acme/dots.git")])]);
        let containers = create_plugins(&cfg, &common()).unwrap();
        let script = containers[0]["command"][2].as_str().unwrap();
        assert!(script.contains("git clone https://github.com/acme/dots.git /persistent/work"));
    }

    #[test]
    fn test_git_branch_and_init_command() {
        let cfg = declared(&[(
            "git",
            &[
                ("repourl", "https://github.com/acme/dots.git"),
                ("branch", "dev"),
                ("initCommand", "make setup"),
            ],
        )]);
        let containers = create_plugins(&cfg, &common()).unwrap();
        let script = containers[0]["command"][2].as_str().unwrap();
        assert!(script.contains("git clone -b dev https://github.com/acme/dots.git"));
        assert!(script.contains("cd /persistent/work && make setup"));
        assert!(script.contains("work directory already exists"));
    }

    #[test]
    fn test_copy_plugins_use_injected_common_fields() {
        let cfg = declared(&[("copyHome", &[]), ("copyDefaultConfig", &[])]);
        let containers = create_plugins(&cfg, &common()).unwrap();
        for container in &containers {
            assert_eq!(container["image"], "img:tag");
            assert_eq!(container["volumeMounts"][0]["name"], "home");
            assert_eq!(container["volumeMounts"][0]["mountPath"], "/persistent");
        }
    }

    #[test]
    fn test_git_renders_before_copy_steps() {
        let cfg = declared(&[
            ("copyDefaultConfig", &[]),
            ("copyHome", &[]),
            ("git", &[("repourl", "https://github.com/acme/dots.git")]),
        ]);
        let containers = create_plugins(&cfg, &common()).unwrap();
        let names: Vec<&str> = containers.iter().map(|c| c["name"].as_str().unwrap()).collect();
        assert_eq!(names, vec!["git", "copy-default-config", "copy-home"]);
    }

    #[test]
    fn test_invalid_repourl() {
        let cfg = declared(&[("git", &[("repourl", "http://")])]);
        assert!(matches!(
            create_plugins(&cfg, &common()),
            Err(Error::InvalidRepoUrl(_))
        ));
    }
}
