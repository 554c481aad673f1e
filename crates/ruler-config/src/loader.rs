//! Tag-aware YAML loading
//!
//! Documents are parsed into a [`Value`] tree and walked once. Three tags are
//! expanded during the walk:
//!
//! - `!include file` splices in another document, resolved relative to the
//!   file containing the tag
//! - `!secret key` looks the key up in `secrets.yaml`
//! - `!env_var NAME` reads the environment
//!
//! Any other tag is left in place for the consumer.

use serde_yaml::value::TaggedValue;
use serde_yaml::{Mapping, Value};
use std::fs;
use std::path::{Path, PathBuf};
use tracing::{debug, trace};

use crate::error::{ConfigError, ConfigResult};
use crate::secrets::Secrets;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Tag {
    Include,
    Secret,
    EnvVar,
}

impl Tag {
    fn parse(tag: &str) -> Option<Self> {
        match tag.trim_start_matches('!') {
            "include" => Some(Tag::Include),
            "secret" => Some(Tag::Secret),
            "env_var" => Some(Tag::EnvVar),
            _ => None,
        }
    }

    fn name(self) -> &'static str {
        match self {
            Tag::Include => "!include",
            Tag::Secret => "!secret",
            Tag::EnvVar => "!env_var",
        }
    }

    /// The plain string a tag must be applied to
    fn argument(self, value: Value) -> ConfigResult<String> {
        match value {
            Value::String(s) => Ok(s),
            other => Err(ConfigError::TagArgument {
                tag: self.name(),
                found: format!("{other:?}"),
            }),
        }
    }
}

pub struct YamlLoader {
    config_dir: PathBuf,
    secrets: Secrets,
    /// Files being expanded, outermost first
    chain: Vec<PathBuf>,
}

impl YamlLoader {
    /// A loader rooted at `config_dir`, with its `secrets.yaml`
    pub fn new(config_dir: impl Into<PathBuf>) -> ConfigResult<Self> {
        let config_dir = config_dir.into();
        let secrets = Secrets::load(&config_dir)?;
        Ok(Self {
            config_dir,
            secrets,
            chain: Vec::new(),
        })
    }

    /// Load `file`, relative to the config directory unless absolute
    pub fn load_file(&mut self, file: impl AsRef<Path>) -> ConfigResult<Value> {
        let path = self.config_dir.join(file.as_ref());
        self.load_path(path)
    }

    fn load_path(&mut self, path: PathBuf) -> ConfigResult<Value> {
        if self.chain.contains(&path) {
            let mut chain = self.chain.clone();
            chain.push(path);
            return Err(ConfigError::IncludeCycle { chain });
        }

        debug!(file = %path.display(), "Loading configuration");
        let content = fs::read_to_string(&path).map_err(|source| ConfigError::Io {
            path: path.clone(),
            source,
        })?;

        self.chain.push(path.clone());
        let result = self.load_str(&content, &path);
        self.chain.pop();
        result
    }

    /// Parse and expand `content`; `origin` anchors relative includes
    pub fn load_str(&mut self, content: &str, origin: &Path) -> ConfigResult<Value> {
        let value = serde_yaml::from_str(content).map_err(|source| ConfigError::Yaml {
            path: origin.to_path_buf(),
            source,
        })?;
        self.expand(value, origin)
    }

    fn expand(&mut self, value: Value, origin: &Path) -> ConfigResult<Value> {
        match value {
            Value::Tagged(tagged) => self.expand_tagged(*tagged, origin),
            Value::Sequence(items) => items
                .into_iter()
                .map(|item| self.expand(item, origin))
                .collect::<ConfigResult<_>>()
                .map(Value::Sequence),
            Value::Mapping(entries) => {
                let mut expanded = Mapping::with_capacity(entries.len());
                for (key, value) in entries {
                    expanded.insert(key, self.expand(value, origin)?);
                }
                Ok(Value::Mapping(expanded))
            }
            scalar => Ok(scalar),
        }
    }

    fn expand_tagged(&mut self, tagged: TaggedValue, origin: &Path) -> ConfigResult<Value> {
        let Some(tag) = Tag::parse(&tagged.tag.to_string()) else {
            trace!(tag = %tagged.tag, "Keeping unknown tag");
            return Ok(Value::Tagged(Box::new(TaggedValue {
                tag: tagged.tag,
                value: self.expand(tagged.value, origin)?,
            })));
        };

        let argument = tag.argument(tagged.value)?;
        match tag {
            Tag::Include => {
                let path = match origin.parent() {
                    Some(base) => base.join(argument),
                    None => self.config_dir.join(argument),
                };
                self.load_path(path)
            }
            Tag::Secret => {
                let secret = self.secrets.get(&argument)?;
                trace!(key = %argument, "Substituted secret");
                Ok(Value::String(secret.to_string()))
            }
            Tag::EnvVar => std::env::var(&argument)
                .map(Value::String)
                .map_err(|_| ConfigError::MissingEnvVar(argument)),
        }
    }
}

/// Load and expand one file
pub fn load_yaml(config_dir: impl Into<PathBuf>, file: impl AsRef<Path>) -> ConfigResult<Value> {
    YamlLoader::new(config_dir)?.load_file(file)
}
