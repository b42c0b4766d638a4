//! Effective environment resolution

use std::collections::BTreeMap;
use std::fmt;
use std::sync::Arc;

use secrecy::{ExposeSecret, SecretString};
use tracing::{debug, warn};

use crate::env::secrets::SecretStore;
use crate::errors::{ProvisionError, ResolutionError, SecretStoreError};
use crate::models::environment::{EnvironmentKind, EnvironmentVariable, SecretRef, SecretSlot, VariableValue};
use crate::models::project::Project;
use crate::models::resource::{DatabaseSpec, Resource, ResourceKind};

const REDACTED: &str = "[REDACTED]";

struct EnvEntry {
    value: SecretString,
    secret: bool,
}

/// Variables a workload is started with, after layering and secret lookup
pub struct EffectiveEnv {
    vars: BTreeMap<String, EnvEntry>,
    database_password: Option<SecretString>,
}

impl EffectiveEnv {
    pub fn empty() -> Self {
        Self {
            vars: BTreeMap::new(),
            database_password: None,
        }
    }

    fn insert(&mut self, key: &str, value: SecretString, secret: bool) {
        self.vars.insert(key.to_string(), EnvEntry { value, secret });
    }

    pub fn get(&self, key: &str) -> Option<&SecretString> {
        self.vars.get(key).map(|e| &e.value)
    }

    pub fn is_secret(&self, key: &str) -> bool {
        self.vars.get(key).map(|e| e.secret).unwrap_or(false)
    }

    pub fn keys(&self) -> impl Iterator<Item = &str> {
        self.vars.keys().map(String::as_str)
    }

    pub fn len(&self) -> usize {
        self.vars.len()
    }

    pub fn is_empty(&self) -> bool {
        self.vars.is_empty()
    }

    /// Resolved password of a database resource
    pub fn database_password(&self) -> Option<&SecretString> {
        self.database_password.as_ref()
    }

    /// Plaintext view of every variable, ordered by key
    pub fn expose(&self) -> BTreeMap<&str, &str> {
        self.vars
            .iter()
            .map(|(k, e)| (k.as_str(), e.value.expose_secret()))
            .collect()
    }

    /// Render a docker `--env-file`
    pub fn to_env_file(&self) -> Result<SecretString, ProvisionError> {
        let mut rendered = String::new();
        for (key, entry) in &self.vars {
            let value = entry.value.expose_secret();
            if value.contains('\n') || value.contains('\r') {
                return Err(ProvisionError::Config(format!(
                    "variable '{}' contains a line break",
                    key
                )));
            }
            rendered.push_str(key);
            rendered.push('=');
            rendered.push_str(value);
            rendered.push('\n');
        }
        Ok(SecretString::from(rendered))
    }

    /// Replace every secret value occurring in `text`
    pub fn scrub(&self, text: &str) -> String {
        let mut secrets: Vec<&str> = self
            .vars
            .values()
            .filter(|e| e.secret)
            .map(|e| e.value.expose_secret())
            .chain(self.database_password.iter().map(|p| p.expose_secret()))
            .filter(|s| !s.is_empty())
            .collect();
        // Longest first so a secret containing another is replaced whole
        secrets.sort_by_key(|s| std::cmp::Reverse(s.len()));

        let mut scrubbed = text.to_string();
        for secret in secrets {
            scrubbed = scrubbed.replace(secret, REDACTED);
        }
        scrubbed
    }
}

impl fmt::Debug for EffectiveEnv {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let mut map = f.debug_map();
        for (key, entry) in &self.vars {
            if entry.secret {
                map.entry(key, &REDACTED);
            } else {
                map.entry(key, &entry.value.expose_secret());
            }
        }
        map.finish()
    }
}

/// Builds effective environments and moves submitted secrets into the store
#[derive(Clone)]
pub struct EnvironmentInjector {
    secrets: Arc<dyn SecretStore>,
}

impl EnvironmentInjector {
    pub fn new(secrets: Arc<dyn SecretStore>) -> Self {
        Self { secrets }
    }

    pub fn secrets(&self) -> &Arc<dyn SecretStore> {
        &self.secrets
    }

    /// Layer project, environment and resource variables, later scopes win.
    ///
    /// Secrets are looked up on every call.
    pub async fn resolve(
        &self,
        project: &Project,
        resource: &Resource,
    ) -> Result<EffectiveEnv, ResolutionError> {
        let environment = match resource.environment.as_deref() {
            Some(name) => Some(project.environment(name).ok_or_else(|| {
                ResolutionError::UnknownEnvironment {
                    name: name.to_string(),
                    project: project.id.clone(),
                }
            })?),
            None => project
                .environments
                .iter()
                .find(|e| e.kind == EnvironmentKind::Prod),
        };

        let layers = [
            Some(project.environment_variables.as_slice()),
            environment.map(|e| e.variables.as_slice()),
            Some(resource.environment_variables.as_slice()),
        ];

        let mut env = EffectiveEnv::empty();
        for layer in layers.into_iter().flatten() {
            self.apply_layer(&mut env, layer).await?;
        }

        if let ResourceKind::Database(DatabaseSpec {
            password: Some(slot),
            ..
        }) = &resource.kind
        {
            env.database_password = Some(self.resolve_slot("dbPassword", slot).await?);
        }

        debug!(
            "Resolved {} variables for resource {}",
            env.len(),
            resource.id
        );
        Ok(env)
    }

    async fn apply_layer(
        &self,
        env: &mut EffectiveEnv,
        variables: &[EnvironmentVariable],
    ) -> Result<(), ResolutionError> {
        for variable in variables {
            match &variable.value {
                VariableValue::Plain(value) => {
                    env.insert(&variable.key, SecretString::from(value.clone()), false)
                }
                VariableValue::Secret(slot) => {
                    let value = self.resolve_slot(&variable.key, slot).await?;
                    env.insert(&variable.key, value, true);
                }
            }
        }
        Ok(())
    }

    async fn resolve_slot(
        &self,
        key: &str,
        slot: &SecretSlot,
    ) -> Result<SecretString, ResolutionError> {
        match slot {
            SecretSlot::Sealed(reference) => {
                self.secrets.get(reference).await.map_err(|e| match e {
                    SecretStoreError::NotFound(_) => ResolutionError::MissingSecret {
                        key: key.to_string(),
                    },
                    other => ResolutionError::Store {
                        key: key.to_string(),
                        message: other.to_string(),
                    },
                })
            }
            SecretSlot::Unsealed(value) => {
                Ok(SecretString::from(value.expose_secret().to_owned()))
            }
        }
    }

    /// Move every unsealed secret of the resource into the store.
    ///
    /// On failure the references created so far are deleted again and the
    /// resource keeps its unsealed slots.
    pub async fn seal(&self, resource: &mut Resource) -> Result<(), SecretStoreError> {
        self.seal_slots(resource.secret_slots_mut()).await
    }

    /// Same as [`seal`](Self::seal) for project and environment variables
    pub async fn seal_project(&self, project: &mut Project) -> Result<(), SecretStoreError> {
        self.seal_slots(project.secret_slots_mut()).await
    }

    async fn seal_slots(&self, mut slots: Vec<&mut SecretSlot>) -> Result<(), SecretStoreError> {
        let mut created: Vec<(usize, SecretRef)> = Vec::new();
        for (index, slot) in slots.iter().enumerate() {
            if let SecretSlot::Unsealed(value) = &**slot {
                match self.secrets.put(value).await {
                    Ok(reference) => created.push((index, reference)),
                    Err(e) => {
                        let references: Vec<SecretRef> =
                            created.into_iter().map(|(_, r)| r).collect();
                        self.discard(&references).await;
                        return Err(e);
                    }
                }
            }
        }

        for (index, reference) in created {
            if let Some(slot) = slots.get_mut(index) {
                **slot = SecretSlot::Sealed(reference);
            }
        }
        Ok(())
    }

    /// Delete every secret the resource references
    pub async fn release(&self, resource: &mut Resource) {
        let references: Vec<SecretRef> = resource
            .secret_slots_mut()
            .into_iter()
            .filter_map(|slot| slot.sealed_ref().cloned())
            .collect();
        self.discard(&references).await;
    }

    async fn discard(&self, references: &[SecretRef]) {
        for reference in references {
            if let Err(e) = self.secrets.delete(reference).await {
                warn!("Failed to delete secret {}: {}", reference, e);
            }
        }
    }
}
