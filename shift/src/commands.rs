use crate::config::{Config, ConfigError};
use bytes::Bytes;
use dialoguer::theme::ColorfulTheme;
use dialoguer::{Confirm, Input};
use proxy::notifications::directory::{ConfigDirectory, UserDirectory};
use relay::upload::{ChunkedUploader, FileUpload, UploadError};
use relay::{
    ClientOptions, ContextError, HostContext, RelayClient, RelayError, UpstreamRequest,
};
use serde_json::json;
use serde_yaml::{Mapping, Value};
use std::path::{Path, PathBuf};

#[derive(thiserror::Error, Debug)]
pub enum CommandError {
    #[error(transparent)]
    Config(#[from] ConfigError),
    #[error(transparent)]
    Context(#[from] ContextError),
    #[error(transparent)]
    Relay(#[from] RelayError),
    #[error(transparent)]
    Upload(#[from] UploadError),
    #[error(transparent)]
    Proxy(#[from] proxy::ProxyError),
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
    #[error("could not update config: {0}")]
    Yaml(#[from] serde_yaml::Error),
    #[error("prompt failed: {0}")]
    Prompt(#[from] dialoguer::Error),
    #[error("`{0}` in the config file is not a mapping")]
    NotAMapping(&'static str),
    #[error("Failed to create test task ({status}): {body}")]
    TestTask { status: u16, body: String },
    #[error("user {0} is not in the config directory")]
    UnknownUser(u64),
}

pub async fn serve(config: Config) -> Result<(), CommandError> {
    proxy::run(config.proxy).await?;
    Ok(())
}

fn ensure_mapping<'a>(
    node: &'a mut Value,
    name: &'static str,
) -> Result<&'a mut Mapping, CommandError> {
    if node.is_null() {
        *node = Value::Mapping(Mapping::new());
    }
    node.as_mapping_mut().ok_or(CommandError::NotAMapping(name))
}

fn section<'a>(parent: &'a mut Mapping, key: &str) -> &'a mut Value {
    parent
        .entry(Value::String(key.into()))
        .or_insert(Value::Null)
}

/// Sets `proxy.shift.<key>`, creating the sections as needed.
pub fn set_shift_value(doc: &mut Value, key: &str, value: &str) -> Result<(), CommandError> {
    let root = ensure_mapping(doc, "document")?;
    let proxy = ensure_mapping(section(root, "proxy"), "proxy")?;
    let shift = ensure_mapping(section(proxy, "shift"), "proxy.shift")?;
    shift.insert(Value::String(key.into()), Value::String(value.into()));
    Ok(())
}

fn shift_value<'a>(doc: &'a Value, key: &str) -> Option<&'a str> {
    doc.get("proxy")?
        .get("shift")?
        .get(key)?
        .as_str()
        .map(str::trim)
        .filter(|v| !v.is_empty())
}

async fn read_document(path: &Path) -> Result<Value, CommandError> {
    Ok(serde_yaml::from_str(&tokio::fs::read_to_string(path).await?)?)
}

async fn write_document(path: &Path, doc: &Value) -> Result<(), CommandError> {
    tokio::fs::write(path, serde_yaml::to_string(doc)?).await?;
    Ok(())
}

/// Prompts for whatever credentials are missing and writes them into the
/// config file, then offers a connectivity test.
pub async fn install(path: &Path) -> Result<(), CommandError> {
    println!("Starting SHIFT installation...");
    let theme = ColorfulTheme::default();

    let mut doc = read_document(path).await?;
    let mut changed = false;

    for (key, var, prompt) in [
        ("token", "SHIFT_TOKEN", "Enter your SHIFT API token"),
        ("project", "SHIFT_PROJECT", "Enter your SHIFT project token"),
    ] {
        if shift_value(&doc, key).is_some() || std::env::var(var).is_ok_and(|v| !v.is_empty()) {
            continue;
        }
        let value: String = Input::with_theme(&theme)
            .with_prompt(prompt)
            .interact_text()?;
        set_shift_value(&mut doc, key, value.trim())?;
        changed = true;
    }

    if changed {
        write_document(path, &doc).await?;
        tracing::info!(path = %path.display(), "credentials written");
    }
    println!("SHIFT installation complete.");

    let run_test = Confirm::with_theme(&theme)
        .with_prompt("Would you like to run a test by creating a dummy task?")
        .default(false)
        .interact()?;
    if run_test {
        let config = Config::from_file(path)?;
        run_test_task(&config).await?;
    }
    Ok(())
}

/// Creates a dummy task to check the credentials against the SHIFT API.
pub async fn run_test_task(config: &Config) -> Result<(), CommandError> {
    let shift = &config.proxy.shift;
    let credentials = shift.resolve()?;
    let client = RelayClient::new(ClientOptions::for_host(shift, &config.proxy.app))?;

    let request = UpstreamRequest::post("/api/tasks").json(json!({
        "title": "Test Task",
        "description": "This is a test task created by the installer",
        "project": credentials.project,
    }));
    let response = client.send(&credentials, request).await?;

    if !response.is_success() {
        return Err(CommandError::TestTask {
            status: response.status.as_u16(),
            body: String::from_utf8_lossy(&response.body).into_owned(),
        });
    }
    println!("Test task created successfully.");
    Ok(())
}

pub struct UploadCommand {
    pub file: PathBuf,
    pub temp_identifier: String,
    pub user_id: u64,
    pub mime_type: Option<String>,
    pub single_shot: bool,
}

/// Uploads a local file as a directory user and prints the attachment.
pub async fn upload(config: &Config, command: UploadCommand) -> Result<(), CommandError> {
    let proxy = &config.proxy;
    let user = ConfigDirectory::new(proxy.users.clone())
        .find(command.user_id)
        .await
        .ok_or(CommandError::UnknownUser(command.user_id))?;
    let ctx = HostContext::resolve(&proxy.shift, &proxy.app, Some(user))?;
    let client = RelayClient::new(ClientOptions::for_host(&proxy.shift, &proxy.app))?;

    let bytes = tokio::fs::read(&command.file).await?;
    let filename = command
        .file
        .file_name()
        .and_then(|name| name.to_str())
        .unwrap_or("upload")
        .to_string();
    let file = FileUpload {
        filename,
        mime_type: command.mime_type,
        temp_identifier: command.temp_identifier,
        bytes: Bytes::from(bytes),
    };

    let uploader = ChunkedUploader::new(client, ctx, proxy.uploads);
    let attachment = if command.single_shot {
        uploader.upload_single(&file).await?
    } else {
        uploader.upload(&file).await?
    };

    println!(
        "{}",
        serde_json::to_string_pretty(&attachment).unwrap_or_else(|_| attachment.to_string())
    );
    Ok(())
}
