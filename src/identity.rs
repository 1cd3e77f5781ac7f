use crate::config::RunConfig;
use crate::error::{Error, Result};
use std::fmt::Write as _;
use std::fs;
use std::path::{Path, PathBuf};

const ROOT_FOLDER_ID_LEN: usize = 33;
const TEAM_DRIVE_ID_LEN: usize = 19;

/// One service-account-backed connection profile. Created once at config
/// generation; only the exhausted flag ever changes afterwards.
#[derive(Debug, Clone)]
pub struct Identity {
    pub index: usize,
    pub label: String,
    pub credential_file: PathBuf,
    pub exhausted: bool,
}

impl Identity {
    pub fn src_profile(&self) -> String {
        format!("src{}", self.label)
    }

    pub fn dst_profile(&self) -> String {
        format!("dst{}", self.label)
    }
}

/// Source and destination targets for one engine invocation.
#[derive(Debug, Clone)]
pub struct Route {
    pub source: String,
    pub dest: String,
}

impl Route {
    pub fn for_identity(config: &RunConfig, identity: &Identity) -> Route {
        let source = match config.source_id {
            Some(_) => format!("{}:{}", identity.src_profile(), config.source_path),
            None => config.source_path.clone(),
        };

        // cache takes the route slot over crypt when both are enabled
        let dst_profile = if config.cache {
            format!("{}_cache", identity.dst_profile())
        } else if config.crypt {
            format!("{}_crypt", identity.dst_profile())
        } else {
            identity.dst_profile()
        };

        Route {
            source,
            dest: format!("{}:{}", dst_profile, config.destination_path),
        }
    }
}

pub struct IdentityPool {
    identities: Vec<Identity>,
}

impl IdentityPool {
    /// Scan the credentials directory, validate the configured drive ids, and
    /// write one src/dst profile pair per credential file to the engine
    /// config file.
    pub fn generate(config: &RunConfig) -> Result<IdentityPool> {
        let files = discover_credentials(&config.accounts_dir)?;

        let client_id = setting(&config.client_id, "CLIENT_ID").unwrap_or_default();
        let client_secret = setting(&config.client_secret, "CLIENT_SECRET").unwrap_or_default();

        let dst_key = drive_id_key(&config.destination_id)?;
        let src_key = match &config.source_id {
            Some(id) => Some(drive_id_key(id)?),
            None => None,
        };
        if let Some(path_id) = &config.source_path_id {
            if src_key != Some("team_drive") {
                return Err(Error::Config(
                    "source_path_id is only valid against a team-drive source".to_string(),
                ));
            }
            if path_id.len() != ROOT_FOLDER_ID_LEN {
                return Err(Error::Config(format!(
                    "source_path_id must be {ROOT_FOLDER_ID_LEN} characters, got {}",
                    path_id.len()
                )));
            }
        }
        let token = match (&config.source_id, setting(&config.token, "TOKEN")) {
            (Some(_), None) => {
                return Err(Error::Config(
                    "token is required when copying from a drive source \
                     (set `token` or the TOKEN environment variable)"
                        .to_string(),
                ));
            }
            (_, token) => token.unwrap_or_default(),
        };

        let mut text = String::new();
        let mut identities = Vec::with_capacity(files.len());
        for (i, file) in files.iter().enumerate() {
            let index = i + 1;
            let label = format!("{index:03}");
            let credential_file = check_credential(file)?;

            if let (Some(source_id), Some(src_key)) = (&config.source_id, src_key) {
                let _ = write!(
                    text,
                    "[src{label}]\n\
                     type = drive\n\
                     scope = drive\n\
                     token = {token}\n\
                     client_id = {client_id}\n\
                     client_secret = {client_secret}\n\
                     {src_key} = {source_id}\n"
                );
                if let Some(path_id) = &config.source_path_id {
                    let _ = writeln!(text, "root_folder_id = {path_id}");
                }
                text.push('\n');
            }

            let _ = write!(
                text,
                "[dst{label}]\n\
                 type = drive\n\
                 scope = drive\n\
                 client_id = {client_id}\n\
                 client_secret = {client_secret}\n\
                 service_account_file = {}\n\
                 {dst_key} = {}\n\n",
                credential_file.display(),
                config.destination_id,
            );

            if config.crypt {
                // loader enforces that the password is present
                let password = config.crypt_password.as_deref().unwrap_or_default();
                let _ = write!(
                    text,
                    "[dst{label}_crypt]\n\
                     type = crypt\n\
                     remote = dst{label}:\n\
                     filename_encryption = standard\n\
                     password = {password}\n\
                     directory_name_encryption = true\n\n"
                );
            }

            if config.cache {
                let _ = write!(
                    text,
                    "[dst{label}_cache]\n\
                     type = cache\n\
                     remote = dst{label}:\n\
                     chunk_total_size = 1G\n\n"
                );
            }

            identities.push(Identity {
                index,
                label,
                credential_file,
                exhausted: false,
            });
        }

        fs::write(&config.engine_config_file, text).map_err(|e| {
            Error::Config(format!(
                "failed to write {}: {}",
                config.engine_config_file.display(),
                e
            ))
        })?;
        log::info!(
            "wrote {} with {} identity profiles",
            config.engine_config_file.display(),
            identities.len()
        );

        Ok(IdentityPool { identities })
    }

    pub fn len(&self) -> usize {
        self.identities.len()
    }

    pub fn is_empty(&self) -> bool {
        self.identities.is_empty()
    }

    /// Look up by 1-based ordinal.
    pub fn get(&self, index: usize) -> Option<&Identity> {
        index
            .checked_sub(1)
            .and_then(|i| self.identities.get(i))
    }

    pub fn mark_exhausted(&mut self, index: usize) {
        if let Some(i) = index.checked_sub(1) {
            if let Some(identity) = self.identities.get_mut(i) {
                identity.exhausted = true;
            }
        }
    }

    pub fn exhausted_count(&self) -> usize {
        self.identities.iter().filter(|i| i.exhausted).count()
    }

    /// The last usable ordinal for a configured end index.
    pub fn clamp_end(&self, end_index: usize) -> usize {
        end_index.min(self.identities.len())
    }
}

/// All `*.json` files under the credentials directory, sorted by name so the
/// ordinal-to-profile assignment is stable between runs.
pub fn discover_credentials(accounts_dir: &Path) -> Result<Vec<PathBuf>> {
    let entries = fs::read_dir(accounts_dir)
        .map_err(|e| Error::Config(format!("{}: {}", accounts_dir.display(), e)))?;

    let mut files: Vec<PathBuf> = entries
        .filter_map(|entry| entry.ok())
        .map(|entry| entry.path())
        .filter(|path| path.extension().and_then(|ext| ext.to_str()) == Some("json"))
        .collect();
    files.sort();

    if files.is_empty() {
        return Err(Error::Config(format!(
            "no service account credential files in {}",
            accounts_dir.display()
        )));
    }
    Ok(files)
}

fn drive_id_key(id: &str) -> Result<&'static str> {
    match id.len() {
        ROOT_FOLDER_ID_LEN => Ok("root_folder_id"),
        TEAM_DRIVE_ID_LEN => Ok("team_drive"),
        other => Err(Error::Config(format!(
            "drive id {id:?} has length {other}; expected {TEAM_DRIVE_ID_LEN} \
             (team drive) or {ROOT_FOLDER_ID_LEN} (shared folder)"
        ))),
    }
}

fn setting(explicit: &Option<String>, env_key: &str) -> Option<String> {
    explicit
        .clone()
        .or_else(|| std::env::var(env_key).ok().filter(|v| !v.is_empty()))
}

fn check_credential(path: &Path) -> Result<PathBuf> {
    let raw = fs::read_to_string(path)
        .map_err(|e| Error::Config(format!("{}: {}", path.display(), e)))?;
    let value: serde_json::Value = serde_json::from_str(&raw)
        .map_err(|e| Error::Config(format!("{}: not valid JSON: {}", path.display(), e)))?;
    if value.get("client_email").is_none() {
        log::warn!(
            "{} has no client_email field; is it a service account key?",
            path.display()
        );
    }
    fs::canonicalize(path)
        .map_err(|e| Error::Config(format!("{}: {}", path.display(), e)))
}
