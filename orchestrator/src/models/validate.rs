//! Resource definition validation

use std::collections::HashSet;

use url::Url;

use crate::errors::ValidationError;
use crate::models::definition::{ProjectDefinition, ResourceDefinition, VariableDefinition};
use crate::models::environment::{Environment, EnvironmentVariable, SecretSlot, VariableValue};
use crate::models::project::Project;
use crate::models::resource::{
    DatabaseEngine, DatabaseSpec, GitSource, Resource, ResourceKind, ServiceEngine,
    ServiceSource, ServiceSpec,
};

const MAX_NAME_LEN: usize = 63;
const DEFAULT_BRANCH: &str = "main";

/// Validate a definition and turn it into a resource in created status.
///
/// Secret values are carried unsealed; they must go through the secret store
/// before the resource is persisted.
pub fn validate(definition: &ResourceDefinition) -> Result<Resource, ValidationError> {
    let name = validate_name(&definition.name)?;
    require("projectId", &definition.project_id)?;
    require("serverId", &definition.server_id)?;

    let kind = match definition.kind.trim() {
        "database" => ResourceKind::Database(database_payload(definition)?),
        "service" => ResourceKind::Service(service_payload(definition)?),
        "website" => ResourceKind::Website(git_payload(definition, None)?),
        "github" => ResourceKind::Github(git_payload(definition, Some("github.com"))?),
        "gitlab" => ResourceKind::Gitlab(git_payload(definition, None)?),
        "bitbucket" => ResourceKind::Bitbucket(git_payload(definition, Some("bitbucket.org"))?),
        other => {
            return Err(ValidationError::new(
                "type",
                format!("unknown resource type '{}'", other),
            ))
        }
    };

    if definition.port == Some(0) {
        return Err(ValidationError::new("port", "must be between 1 and 65535"));
    }
    if let Some(path) = present(&definition.health_path) {
        if !path.starts_with('/') {
            return Err(ValidationError::new("healthPath", "must start with '/'"));
        }
    }

    let mut resource = Resource::new(
        uuid::Uuid::new_v4().to_string(),
        name,
        definition.project_id.trim(),
        definition.server_id.trim(),
        kind,
    );
    resource.environment = present(&definition.environment).map(str::to_string);
    resource.environment_variables =
        validate_variables("environmentVariables", &definition.environment_variables)?;
    resource.port = definition.port;
    resource.health_path = present(&definition.health_path).map(str::to_string);
    Ok(resource)
}

/// Validate a project definition; secrets stay unsealed like in [`validate`]
pub fn validate_project(definition: &ProjectDefinition) -> Result<Project, ValidationError> {
    let name = validate_name(&definition.name)?;
    require("ownerId", &definition.owner_id)?;
    require("serverId", &definition.server_id)?;

    let mut project = Project::new(
        uuid::Uuid::new_v4().to_string(),
        name,
        definition.owner_id.trim(),
        definition.server_id.trim(),
    );
    project.description = present(&definition.description)
        .unwrap_or_default()
        .to_string();
    project.environment_variables =
        validate_variables("environmentVariables", &definition.environment_variables)?;

    let mut names = HashSet::new();
    for (i, env) in definition.environments.iter().enumerate() {
        let field = format!("environments[{}]", i);
        let env_name = env.name.trim();
        if env_name.is_empty() {
            return Err(ValidationError::new(field, "name is required"));
        }
        if !names.insert(env_name.to_string()) {
            return Err(ValidationError::new(
                field,
                format!("duplicate environment '{}'", env_name),
            ));
        }
        project.environments.push(Environment {
            id: uuid::Uuid::new_v4().to_string(),
            name: env_name.to_string(),
            kind: env.kind,
            variables: validate_variables(&format!("{}.variables", field), &env.variables)?,
            project_id: project.id.clone(),
        });
    }
    Ok(project)
}

/// A field counts as present when it holds non-blank text
fn present(field: &Option<String>) -> Option<&str> {
    field.as_deref().map(str::trim).filter(|s| !s.is_empty())
}

fn require(field: &str, value: &str) -> Result<(), ValidationError> {
    if value.trim().is_empty() {
        return Err(ValidationError::new(field, "is required"));
    }
    Ok(())
}

fn reject_fields(
    definition_type: &str,
    fields: &[(&str, &Option<String>)],
) -> Result<(), ValidationError> {
    for (field, value) in fields {
        if present(value).is_some() {
            return Err(ValidationError::new(
                *field,
                format!("not allowed on a {} resource", definition_type),
            ));
        }
    }
    Ok(())
}

fn database_fields(d: &ResourceDefinition) -> [(&'static str, &Option<String>); 5] {
    [
        ("databaseType", &d.database_type),
        ("databaseName", &d.database_name),
        ("adminEmail", &d.admin_email),
        ("initialDatabase", &d.initial_database),
        ("dbPassword", &d.db_password),
    ]
}

fn service_fields(d: &ResourceDefinition) -> [(&'static str, &Option<String>); 3] {
    [
        ("serviceType", &d.service_type),
        ("dockerComposeContent", &d.docker_compose_content),
        ("dockerImageUrl", &d.docker_image_url),
    ]
}

fn git_fields(d: &ResourceDefinition) -> [(&'static str, &Option<String>); 4] {
    [
        ("repositoryUrl", &d.repository_url),
        ("branch", &d.branch),
        ("commit", &d.commit),
        ("dockerfilePath", &d.dockerfile_path),
    ]
}

fn validate_name(name: &str) -> Result<String, ValidationError> {
    let name = name.trim();
    if name.is_empty() {
        return Err(ValidationError::new("name", "is required"));
    }
    if name.len() > MAX_NAME_LEN {
        return Err(ValidationError::new(
            "name",
            format!("must be at most {} characters", MAX_NAME_LEN),
        ));
    }
    if !name
        .chars()
        .all(|c| c.is_ascii_alphanumeric() || matches!(c, ' ' | '-' | '_' | '.'))
    {
        return Err(ValidationError::new(
            "name",
            "may only contain letters, digits, spaces, '-', '_' and '.'",
        ));
    }
    Ok(name.to_string())
}

fn is_identifier(s: &str) -> bool {
    let mut chars = s.chars();
    match chars.next() {
        Some(c) if c.is_ascii_alphabetic() || c == '_' => {}
        _ => return false,
    }
    s.len() <= MAX_NAME_LEN && chars.all(|c| c.is_ascii_alphanumeric() || c == '_')
}

fn database_payload(d: &ResourceDefinition) -> Result<DatabaseSpec, ValidationError> {
    reject_fields("database", &service_fields(d))?;
    reject_fields("database", &git_fields(d))?;

    let engine = match present(&d.database_type) {
        Some("postgres") => DatabaseEngine::Postgres,
        Some("mysql") => DatabaseEngine::Mysql,
        Some("mongodb") => DatabaseEngine::Mongodb,
        Some(other) => {
            return Err(ValidationError::new(
                "databaseType",
                format!("unsupported database engine '{}'", other),
            ))
        }
        None => return Err(ValidationError::new("databaseType", "is required")),
    };

    let database_name = present(&d.database_name)
        .ok_or_else(|| ValidationError::new("databaseName", "is required"))?;
    if !is_identifier(database_name) {
        return Err(ValidationError::new(
            "databaseName",
            "must start with a letter or '_' and contain only letters, digits and '_'",
        ));
    }

    let admin_email = present(&d.admin_email)
        .ok_or_else(|| ValidationError::new("adminEmail", "is required"))?;
    validate_email(admin_email)?;

    let initial_database = match present(&d.initial_database) {
        Some(db) if !is_identifier(db) => {
            return Err(ValidationError::new(
                "initialDatabase",
                "must start with a letter or '_' and contain only letters, digits and '_'",
            ))
        }
        other => other.map(str::to_string),
    };

    Ok(DatabaseSpec {
        engine,
        database_name: database_name.to_string(),
        admin_email: admin_email.to_string(),
        initial_database,
        // Passwords are kept verbatim, including surrounding whitespace
        password: d
            .db_password
            .as_deref()
            .filter(|p| !p.is_empty())
            .map(SecretSlot::unsealed),
    })
}

fn validate_email(email: &str) -> Result<(), ValidationError> {
    let mut parts = email.split('@');
    let valid = match (parts.next(), parts.next(), parts.next()) {
        (Some(local), Some(domain), None) => {
            !local.is_empty()
                && domain.contains('.')
                && !domain.starts_with('.')
                && !domain.ends_with('.')
                && !email.contains(char::is_whitespace)
        }
        _ => false,
    };
    if !valid {
        return Err(ValidationError::new("adminEmail", "is not a valid email address"));
    }
    Ok(())
}

fn service_payload(d: &ResourceDefinition) -> Result<ServiceSpec, ValidationError> {
    reject_fields("service", &database_fields(d))?;

    let engine = match present(&d.service_type) {
        Some("node") => ServiceEngine::Node,
        Some("python") => ServiceEngine::Python,
        Some("docker") => ServiceEngine::Docker,
        Some(other) => {
            return Err(ValidationError::new(
                "serviceType",
                format!("unsupported service engine '{}'", other),
            ))
        }
        None => return Err(ValidationError::new("serviceType", "is required")),
    };

    let sources = [
        present(&d.repository_url).is_some(),
        present(&d.docker_compose_content).is_some(),
        present(&d.docker_image_url).is_some(),
    ];
    if sources.iter().filter(|s| **s).count() != 1 {
        return Err(ValidationError::new(
            "source",
            "exactly one of repositoryUrl, dockerComposeContent or dockerImageUrl is required",
        ));
    }

    let source = if let Some(content) = present(&d.docker_compose_content) {
        reject_fields("compose service", &git_fields(d))?;
        validate_compose(content)?;
        ServiceSource::Compose {
            content: content.to_string(),
        }
    } else if let Some(reference) = present(&d.docker_image_url) {
        reject_fields("image service", &git_fields(d))?;
        parse_image_reference(reference)
            .map_err(|message| ValidationError::new("dockerImageUrl", message))?;
        ServiceSource::Image {
            reference: reference.to_string(),
        }
    } else {
        ServiceSource::Repository(git_payload(d, None)?)
    };

    Ok(ServiceSpec { engine, source })
}

fn git_payload(
    d: &ResourceDefinition,
    required_host: Option<&str>,
) -> Result<GitSource, ValidationError> {
    reject_fields(d.kind.trim(), &database_fields(d))?;
    if d.kind.trim() != "service" {
        reject_fields(d.kind.trim(), &service_fields(d))?;
    }

    let repository_url = present(&d.repository_url)
        .ok_or_else(|| ValidationError::new("repositoryUrl", "is required"))?;
    validate_repository_url(repository_url, required_host)?;

    let branch = present(&d.branch).unwrap_or(DEFAULT_BRANCH);
    if branch.starts_with('-')
        || branch.contains("..")
        || branch.contains(char::is_whitespace)
        || branch.ends_with('/')
    {
        return Err(ValidationError::new("branch", "is not a valid branch name"));
    }

    let commit = present(&d.commit);
    if let Some(commit) = commit {
        if !(7..=40).contains(&commit.len()) || !commit.chars().all(|c| c.is_ascii_hexdigit()) {
            return Err(ValidationError::new(
                "commit",
                "must be a 7 to 40 character hex commit id",
            ));
        }
    }

    let dockerfile_path = present(&d.dockerfile_path);
    if let Some(path) = dockerfile_path {
        if path.starts_with('/') || path.split('/').any(|segment| segment == "..") {
            return Err(ValidationError::new(
                "dockerfilePath",
                "must be a path inside the repository",
            ));
        }
    }

    Ok(GitSource {
        repository_url: repository_url.to_string(),
        branch: branch.to_string(),
        commit: commit.map(str::to_string),
        dockerfile_path: dockerfile_path.map(str::to_string),
    })
}

/// Accepts `scheme://host/path` URLs and scp-like `user@host:path`
pub fn validate_repository_url(
    raw: &str,
    required_host: Option<&str>,
) -> Result<(), ValidationError> {
    // Checked out with git on the target, where a leading dash reads as an option
    if raw.starts_with('-') {
        return Err(ValidationError::new("repositoryUrl", "must not start with '-'"));
    }
    let normalized = match raw.split_once("://") {
        Some(_) => raw.to_string(),
        None => match raw.split_once(':') {
            Some((user_host, _)) if user_host.split('@').any(|part| part.starts_with('-')) => {
                return Err(ValidationError::new(
                    "repositoryUrl",
                    "user and host must not start with '-'",
                ))
            }
            Some((user_host, path)) if user_host.contains('@') && !path.is_empty() => {
                format!("ssh://{}/{}", user_host, path.trim_start_matches('/'))
            }
            _ => {
                return Err(ValidationError::new(
                    "repositoryUrl",
                    "must be an http(s), ssh or git URL",
                ))
            }
        },
    };

    let url = Url::parse(&normalized)
        .map_err(|e| ValidationError::new("repositoryUrl", format!("is not a valid URL: {}", e)))?;
    if !matches!(url.scheme(), "https" | "http" | "ssh" | "git") {
        return Err(ValidationError::new(
            "repositoryUrl",
            format!("unsupported scheme '{}'", url.scheme()),
        ));
    }
    let host = url
        .host_str()
        .filter(|h| !h.is_empty())
        .ok_or_else(|| ValidationError::new("repositoryUrl", "must include a host"))?;
    if host.starts_with('-') || url.username().starts_with('-') {
        return Err(ValidationError::new(
            "repositoryUrl",
            "user and host must not start with '-'",
        ));
    }
    if url.path().trim_matches('/').is_empty() {
        return Err(ValidationError::new(
            "repositoryUrl",
            "must include a repository path",
        ));
    }
    if let Some(required) = required_host {
        if !host.eq_ignore_ascii_case(required) {
            return Err(ValidationError::new(
                "repositoryUrl",
                format!("must be hosted on {}", required),
            ));
        }
    }
    Ok(())
}

fn validate_compose(content: &str) -> Result<(), ValidationError> {
    let document: serde_yaml::Value = serde_yaml::from_str(content).map_err(|e| {
        ValidationError::new("dockerComposeContent", format!("is not valid YAML: {}", e))
    })?;
    let services = document
        .get("services")
        .and_then(|s| s.as_mapping())
        .ok_or_else(|| {
            ValidationError::new("dockerComposeContent", "must define a 'services' mapping")
        })?;
    if services.is_empty() {
        return Err(ValidationError::new(
            "dockerComposeContent",
            "must define at least one service",
        ));
    }
    Ok(())
}

/// Parsed container image reference
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ImageReference {
    pub registry: Option<String>,
    pub repository: String,
    pub tag: Option<String>,
    pub digest: Option<String>,
}

/// Parse `[registry/]repository[:tag][@digest]`
pub fn parse_image_reference(raw: &str) -> Result<ImageReference, String> {
    if raw.is_empty() || raw.contains(char::is_whitespace) {
        return Err("must be a non-empty image reference without whitespace".to_string());
    }

    let (rest, digest) = match raw.split_once('@') {
        Some((rest, digest)) => {
            let hex = digest
                .strip_prefix("sha256:")
                .ok_or_else(|| "digest must start with 'sha256:'".to_string())?;
            if hex.len() != 64 || !hex.chars().all(|c| c.is_ascii_hexdigit()) {
                return Err("digest must be 64 hex characters".to_string());
            }
            (rest, Some(digest.to_string()))
        }
        None => (raw, None),
    };

    let (registry, path) = match rest.split_once('/') {
        Some((first, remainder))
            if first.contains('.') || first.contains(':') || first == "localhost" =>
        {
            (Some(first.to_string()), remainder)
        }
        _ => (None, rest),
    };

    let (repository, tag) = match path.rsplit_once(':') {
        Some((repository, tag)) => (repository, Some(tag)),
        None => (path, None),
    };

    if repository.is_empty()
        || repository.split('/').any(|component| {
            component.is_empty()
                || !component.chars().all(|c| {
                    c.is_ascii_lowercase() || c.is_ascii_digit() || matches!(c, '.' | '_' | '-')
                })
        })
    {
        return Err(format!("invalid repository name '{}'", repository));
    }

    if let Some(tag) = tag {
        let valid = !tag.is_empty()
            && tag.len() <= 128
            && !tag.starts_with(['.', '-'])
            && tag
                .chars()
                .all(|c| c.is_ascii_alphanumeric() || matches!(c, '.' | '_' | '-'));
        if !valid {
            return Err(format!("invalid tag '{}'", tag));
        }
    }

    Ok(ImageReference {
        registry,
        repository: repository.to_string(),
        tag: tag.map(str::to_string),
        digest,
    })
}

fn validate_variables(
    scope: &str,
    variables: &[VariableDefinition],
) -> Result<Vec<EnvironmentVariable>, ValidationError> {
    let mut seen = HashSet::new();
    let mut validated = Vec::with_capacity(variables.len());

    for (i, variable) in variables.iter().enumerate() {
        let field = format!("{}[{}]", scope, i);
        let key = variable.key.trim();
        if !is_env_key(key) {
            return Err(ValidationError::new(
                field,
                "key must start with a letter or '_' and contain only letters, digits and '_'",
            ));
        }
        if !seen.insert(key.to_string()) {
            return Err(ValidationError::new(
                field,
                format!("duplicate key '{}'", key),
            ));
        }
        let value = if variable.is_secret {
            if variable.value.is_empty() {
                return Err(ValidationError::new(
                    field,
                    format!("secret '{}' must have a value", key),
                ));
            }
            VariableValue::Secret(SecretSlot::unsealed(variable.value.clone()))
        } else {
            VariableValue::Plain(variable.value.clone())
        };
        validated.push(EnvironmentVariable {
            key: key.to_string(),
            value,
        });
    }

    Ok(validated)
}

fn is_env_key(key: &str) -> bool {
    let mut chars = key.chars();
    match chars.next() {
        Some(c) if c.is_ascii_alphabetic() || c == '_' => {}
        _ => return false,
    }
    chars.all(|c| c.is_ascii_alphanumeric() || c == '_')
}
