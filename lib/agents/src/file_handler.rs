//! File handler agent.
//!
//! Filesystem operations: read, write, delete, copy, move, list, info,
//! search, compress (zip), extract. Reads are capped by `max_file_size`;
//! formats are auto-detected by extension with a content-sniffing fallback.
//!
//! Input validation failures surface as errors; operational failures
//! (missing file, bad archive) come back as an error payload with
//! `operation_success: false`, matching how the other side-effecting agents
//! report.

use crate::registry::Agent;
use agentflow_workflow::agent::{AgentInput, AgentMetadata, AgentOutcome};
use agentflow_workflow::error::AgentFailure;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde_json::{Map, Value as JsonValue, json};
use std::io::Write as _;
use std::path::{Path, PathBuf};
use tokio_util::sync::CancellationToken;

const DEFAULT_MAX_FILE_SIZE: u64 = 10 * 1024 * 1024;

const PATH_REQUIRED_OPERATIONS: [&str; 6] = ["read", "write", "delete", "copy", "move", "extract"];

/// The file handler agent.
pub struct FileHandlerAgent;

impl FileHandlerAgent {
    /// Creates the agent.
    #[must_use]
    pub fn new() -> Self {
        Self
    }
}

impl Default for FileHandlerAgent {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl Agent for FileHandlerAgent {
    async fn run(
        &self,
        config: &JsonValue,
        input: AgentInput,
        _cancel: &CancellationToken,
    ) -> Result<AgentOutcome, AgentFailure> {
        let started_at = Utc::now();
        let max_file_size = config
            .get("max_file_size")
            .and_then(JsonValue::as_u64)
            .unwrap_or(DEFAULT_MAX_FILE_SIZE);

        let operation = input
            .get_str("operation")
            .ok_or_else(|| AgentFailure::InvalidInput {
                message: "No operation specified".to_string(),
            })?
            .to_string();
        let file_path = input
            .get_str("file_path")
            .or_else(|| input.get_str("path"))
            .map(ToString::to_string);

        if PATH_REQUIRED_OPERATIONS.contains(&operation.as_str()) && file_path.is_none() {
            return Err(AgentFailure::InvalidInput {
                message: "File path is required for this operation".to_string(),
            });
        }

        let content = input.get("content").cloned();
        let parameters = input
            .get("parameters")
            .and_then(JsonValue::as_object)
            .cloned()
            .unwrap_or_default();

        let result = perform_operation(
            &operation,
            file_path.as_deref(),
            content.as_ref(),
            &parameters,
            max_file_size,
        )
        .await;

        let (output, success) = match result {
            Ok(output) => (output, true),
            Err(error) => {
                tracing::warn!(operation, error = %error, "file operation failed");
                (json!({"error": error.to_string()}), false)
            }
        };

        let files_processed = output
            .get("files_processed")
            .cloned()
            .unwrap_or_else(|| json!(1));

        let mut variables = Map::new();
        variables.insert("operation_success".to_string(), json!(success));
        variables.insert("operation_type".to_string(), json!(operation));
        if success {
            variables.insert("files_processed".to_string(), files_processed);
        } else if let Some(error) = output.get("error") {
            variables.insert("error_message".to_string(), error.clone());
        }

        Ok(AgentOutcome {
            output,
            variables,
            metadata: AgentMetadata::spanning(started_at),
        })
    }
}

async fn perform_operation(
    operation: &str,
    file_path: Option<&str>,
    content: Option<&JsonValue>,
    parameters: &Map<String, JsonValue>,
    max_file_size: u64,
) -> Result<JsonValue, AgentFailure> {
    match operation {
        "read" => read_file(file_path.expect("validated"), parameters, max_file_size).await,
        "write" => write_file(file_path.expect("validated"), content, parameters).await,
        "delete" => delete_file(file_path.expect("validated")).await,
        "copy" => transfer_file(file_path.expect("validated"), parameters, false).await,
        "move" => transfer_file(file_path.expect("validated"), parameters, true).await,
        "list" => {
            let directory = parameters
                .get("directory")
                .and_then(JsonValue::as_str)
                .unwrap_or(".");
            list_files(directory, parameters).await
        }
        "info" => {
            let path = file_path.ok_or_else(|| AgentFailure::InvalidInput {
                message: "File path is required for this operation".to_string(),
            })?;
            file_info(Path::new(path)).await
        }
        "search" => {
            let directory = parameters
                .get("directory")
                .and_then(JsonValue::as_str)
                .unwrap_or(".");
            search_files(directory, parameters).await
        }
        "compress" => compress_files(parameters).await,
        "extract" => extract_archive(file_path.expect("validated"), parameters).await,
        other => Err(AgentFailure::InvalidInput {
            message: format!("Unsupported operation: {other}"),
        }),
    }
}

fn io_failure(error: &std::io::Error) -> AgentFailure {
    AgentFailure::Internal {
        message: error.to_string(),
    }
}

async fn read_file(
    path: &str,
    parameters: &Map<String, JsonValue>,
    max_file_size: u64,
) -> Result<JsonValue, AgentFailure> {
    let metadata = tokio::fs::metadata(path).await.map_err(|_| AgentFailure::InvalidInput {
        message: format!("File not found: {path}"),
    })?;
    if metadata.len() > max_file_size {
        return Err(AgentFailure::InvalidInput {
            message: format!(
                "File too large: {} bytes (max: {max_file_size})",
                metadata.len()
            ),
        });
    }

    let raw = tokio::fs::read_to_string(path)
        .await
        .map_err(|e| io_failure(&e))?;

    let requested = parameters
        .get("format")
        .and_then(JsonValue::as_str)
        .unwrap_or("auto");
    let format = if requested == "auto" {
        detect_format(path, &raw)
    } else {
        requested.to_string()
    };
    let parsed = parse_content(&raw, &format);

    Ok(json!({
        "file_path": path,
        "file_size": metadata.len(),
        "format": format,
        "content": parsed,
        "raw_content": raw,
        "mime_type": mime_type_of(path),
    }))
}

async fn write_file(
    path: &str,
    content: Option<&JsonValue>,
    parameters: &Map<String, JsonValue>,
) -> Result<JsonValue, AgentFailure> {
    let format = parameters
        .get("format")
        .and_then(JsonValue::as_str)
        .unwrap_or("auto");
    let create_dirs = parameters
        .get("create_dirs")
        .and_then(JsonValue::as_bool)
        .unwrap_or(true);

    if create_dirs
        && let Some(parent) = Path::new(path).parent()
        && !parent.as_os_str().is_empty()
    {
        tokio::fs::create_dir_all(parent)
            .await
            .map_err(|e| io_failure(&e))?;
    }

    let content = content.cloned().unwrap_or(JsonValue::Null);
    let rendered = match (format, &content) {
        ("json", value) if value.is_object() || value.is_array() => {
            serde_json::to_string_pretty(value).map_err(|e| AgentFailure::Internal {
                message: e.to_string(),
            })?
        }
        ("csv", JsonValue::Array(rows)) => records_to_csv(rows)?,
        (_, JsonValue::String(text)) => text.clone(),
        (_, value) => value.to_string(),
    };

    tokio::fs::write(path, rendered.as_bytes())
        .await
        .map_err(|e| io_failure(&e))?;

    Ok(json!({
        "file_path": path,
        "bytes_written": rendered.len(),
        "format": format,
        "created": true,
    }))
}

async fn delete_file(path: &str) -> Result<JsonValue, AgentFailure> {
    tokio::fs::remove_file(path)
        .await
        .map_err(|_| AgentFailure::InvalidInput {
            message: format!("File not found: {path}"),
        })?;
    Ok(json!({"file_path": path, "deleted": true}))
}

async fn transfer_file(
    source: &str,
    parameters: &Map<String, JsonValue>,
    remove_source: bool,
) -> Result<JsonValue, AgentFailure> {
    let destination = parameters
        .get("destination")
        .and_then(JsonValue::as_str)
        .ok_or_else(|| AgentFailure::InvalidInput {
            message: "destination parameter is required".to_string(),
        })?;

    if tokio::fs::metadata(source).await.is_err() {
        return Err(AgentFailure::InvalidInput {
            message: format!("Source file not found: {source}"),
        });
    }

    if let Some(parent) = Path::new(destination).parent()
        && !parent.as_os_str().is_empty()
    {
        tokio::fs::create_dir_all(parent)
            .await
            .map_err(|e| io_failure(&e))?;
    }

    tokio::fs::copy(source, destination)
        .await
        .map_err(|e| io_failure(&e))?;
    if remove_source {
        tokio::fs::remove_file(source)
            .await
            .map_err(|e| io_failure(&e))?;
        Ok(json!({"source_path": source, "destination_path": destination, "moved": true}))
    } else {
        Ok(json!({"source_path": source, "destination_path": destination, "copied": true}))
    }
}

async fn list_files(
    directory: &str,
    parameters: &Map<String, JsonValue>,
) -> Result<JsonValue, AgentFailure> {
    if tokio::fs::metadata(directory).await.is_err() {
        return Err(AgentFailure::InvalidInput {
            message: format!("Directory not found: {directory}"),
        });
    }

    let recursive = parameters
        .get("recursive")
        .and_then(JsonValue::as_bool)
        .unwrap_or(false);
    let pattern = parameters
        .get("pattern")
        .and_then(JsonValue::as_str)
        .unwrap_or("*");
    let include_hidden = parameters
        .get("include_hidden")
        .and_then(JsonValue::as_bool)
        .unwrap_or(false);
    let matcher = glob::Pattern::new(pattern).map_err(|e| AgentFailure::InvalidInput {
        message: format!("invalid pattern: {e}"),
    })?;

    let mut files = Vec::new();
    let mut directories = Vec::new();
    let mut pending: Vec<PathBuf> = vec![PathBuf::from(directory)];

    while let Some(dir) = pending.pop() {
        let mut entries = tokio::fs::read_dir(&dir).await.map_err(|e| io_failure(&e))?;
        while let Some(entry) = entries.next_entry().await.map_err(|e| io_failure(&e))? {
            let name = entry.file_name().to_string_lossy().to_string();
            if !include_hidden && name.starts_with('.') {
                continue;
            }
            let path = entry.path();
            let file_type = entry.file_type().await.map_err(|e| io_failure(&e))?;
            if file_type.is_dir() {
                directories.push(name);
                if recursive {
                    pending.push(path);
                }
            } else if matcher.matches(&name) {
                files.push(file_info(&path).await?);
            }
        }
    }

    let total_files = files.len();
    let total_directories = directories.len();
    Ok(json!({
        "directory": directory,
        "files": files,
        "directories": directories,
        "total_files": total_files,
        "total_directories": total_directories,
    }))
}

async fn file_info(path: &Path) -> Result<JsonValue, AgentFailure> {
    let metadata = tokio::fs::metadata(path)
        .await
        .map_err(|_| AgentFailure::InvalidInput {
            message: format!("File not found: {}", path.display()),
        })?;

    let modified = metadata
        .modified()
        .ok()
        .map(DateTime::<Utc>::from)
        .map(|t| t.to_rfc3339());
    let created = metadata
        .created()
        .ok()
        .map(DateTime::<Utc>::from)
        .map(|t| t.to_rfc3339());

    Ok(json!({
        "path": path.to_string_lossy(),
        "name": path.file_name().map(|n| n.to_string_lossy().to_string()),
        "size": metadata.len(),
        "created": created,
        "modified": modified,
        "is_file": metadata.is_file(),
        "is_directory": metadata.is_dir(),
        "mime_type": mime_type_of(&path.to_string_lossy()),
    }))
}

async fn search_files(
    directory: &str,
    parameters: &Map<String, JsonValue>,
) -> Result<JsonValue, AgentFailure> {
    let pattern = parameters
        .get("pattern")
        .and_then(JsonValue::as_str)
        .unwrap_or("*");
    let matcher = glob::Pattern::new(pattern).map_err(|e| AgentFailure::InvalidInput {
        message: format!("invalid pattern: {e}"),
    })?;
    let content_search = parameters
        .get("content_search")
        .and_then(JsonValue::as_str)
        .map(str::to_lowercase);
    let file_types: Vec<String> = parameters
        .get("file_types")
        .and_then(JsonValue::as_array)
        .map(|list| {
            list.iter()
                .filter_map(JsonValue::as_str)
                .map(str::to_lowercase)
                .collect()
        })
        .unwrap_or_default();
    let min_size = parameters
        .get("min_size")
        .and_then(JsonValue::as_u64)
        .unwrap_or(0);
    let max_size = parameters
        .get("max_size")
        .and_then(JsonValue::as_u64)
        .unwrap_or(u64::MAX);

    let mut matching = Vec::new();
    let mut pending: Vec<PathBuf> = vec![PathBuf::from(directory)];

    while let Some(dir) = pending.pop() {
        let Ok(mut entries) = tokio::fs::read_dir(&dir).await else {
            continue;
        };
        while let Some(entry) = entries.next_entry().await.map_err(|e| io_failure(&e))? {
            let path = entry.path();
            let file_type = entry.file_type().await.map_err(|e| io_failure(&e))?;
            if file_type.is_dir() {
                pending.push(path);
                continue;
            }

            let name = entry.file_name().to_string_lossy().to_string();
            if !matcher.matches(&name) {
                continue;
            }
            if !file_types.is_empty() {
                let extension = path
                    .extension()
                    .map(|e| format!(".{}", e.to_string_lossy().to_lowercase()))
                    .unwrap_or_default();
                if !file_types.contains(&extension) {
                    continue;
                }
            }
            let size = entry.metadata().await.map_err(|e| io_failure(&e))?.len();
            if size < min_size || size > max_size {
                continue;
            }
            if let Some(needle) = &content_search {
                match tokio::fs::read_to_string(&path).await {
                    Ok(content) if content.to_lowercase().contains(needle) => {}
                    _ => continue,
                }
            }
            matching.push(file_info(&path).await?);
        }
    }

    let total_matches = matching.len();
    Ok(json!({
        "directory": directory,
        "search_criteria": parameters,
        "matching_files": matching,
        "total_matches": total_matches,
    }))
}

async fn compress_files(parameters: &Map<String, JsonValue>) -> Result<JsonValue, AgentFailure> {
    let files: Vec<String> = parameters
        .get("files")
        .and_then(JsonValue::as_array)
        .map(|list| {
            list.iter()
                .filter_map(JsonValue::as_str)
                .map(ToString::to_string)
                .collect()
        })
        .unwrap_or_default();
    let archive_path = parameters
        .get("archive_path")
        .and_then(JsonValue::as_str)
        .unwrap_or("archive.zip")
        .to_string();

    let archive = archive_path.clone();
    let compressed = tokio::task::spawn_blocking(move || -> Result<usize, AgentFailure> {
        let file = std::fs::File::create(&archive).map_err(|e| io_failure(&e))?;
        let mut writer = zip::ZipWriter::new(file);
        let options = zip::write::SimpleFileOptions::default()
            .compression_method(zip::CompressionMethod::Deflated);

        let mut count = 0;
        for path in &files {
            let Ok(data) = std::fs::read(path) else {
                continue;
            };
            let name = Path::new(path)
                .file_name()
                .map(|n| n.to_string_lossy().to_string())
                .unwrap_or_else(|| path.clone());
            writer
                .start_file(name, options)
                .map_err(|e| AgentFailure::Internal {
                    message: e.to_string(),
                })?;
            writer.write_all(&data).map_err(|e| io_failure(&e))?;
            count += 1;
        }
        writer.finish().map_err(|e| AgentFailure::Internal {
            message: e.to_string(),
        })?;
        Ok(count)
    })
    .await
    .map_err(|e| AgentFailure::Internal {
        message: e.to_string(),
    })??;

    Ok(json!({
        "archive_path": archive_path,
        "files_compressed": compressed,
        "files_processed": compressed,
        "compression_type": "zip",
    }))
}

async fn extract_archive(
    archive_path: &str,
    parameters: &Map<String, JsonValue>,
) -> Result<JsonValue, AgentFailure> {
    let extract_to = parameters
        .get("extract_to")
        .and_then(JsonValue::as_str)
        .unwrap_or("./extracted")
        .to_string();

    let archive = archive_path.to_string();
    let destination = extract_to.clone();
    let extracted = tokio::task::spawn_blocking(move || -> Result<Vec<String>, AgentFailure> {
        std::fs::create_dir_all(&destination).map_err(|e| io_failure(&e))?;
        let file = std::fs::File::open(&archive).map_err(|_| AgentFailure::InvalidInput {
            message: format!("File not found: {archive}"),
        })?;
        let mut zip = zip::ZipArchive::new(file).map_err(|e| AgentFailure::BadResponse {
            message: format!("invalid archive: {e}"),
        })?;
        let names: Vec<String> = zip.file_names().map(ToString::to_string).collect();
        zip.extract(&destination).map_err(|e| AgentFailure::Internal {
            message: e.to_string(),
        })?;
        Ok(names)
    })
    .await
    .map_err(|e| AgentFailure::Internal {
        message: e.to_string(),
    })??;

    let total_files = extracted.len();
    Ok(json!({
        "archive_path": archive_path,
        "extract_to": extract_to,
        "extracted_files": extracted,
        "total_files": total_files,
        "files_processed": total_files,
    }))
}

fn detect_format(path: &str, content: &str) -> String {
    let extension = Path::new(path)
        .extension()
        .map(|e| e.to_string_lossy().to_lowercase())
        .unwrap_or_default();

    match extension.as_str() {
        "json" => "json".to_string(),
        "csv" => "csv".to_string(),
        "txt" | "md" => "text".to_string(),
        "yaml" | "yml" => "yaml".to_string(),
        "xml" => "xml".to_string(),
        _ => {
            if serde_json::from_str::<JsonValue>(content).is_ok() {
                "json".to_string()
            } else if content.contains(',') && content.contains('\n') {
                "csv".to_string()
            } else {
                "text".to_string()
            }
        }
    }
}

fn parse_content(content: &str, format: &str) -> JsonValue {
    match format {
        "json" => serde_json::from_str(content).unwrap_or_else(|_| json!(content)),
        "csv" => {
            let mut reader = csv::Reader::from_reader(content.as_bytes());
            let Ok(headers) = reader.headers().cloned() else {
                return json!(content);
            };
            let mut rows = Vec::new();
            for record in reader.records().flatten() {
                let mut row = Map::new();
                for (header, field) in headers.iter().zip(record.iter()) {
                    row.insert(header.to_string(), json!(field));
                }
                rows.push(JsonValue::Object(row));
            }
            JsonValue::Array(rows)
        }
        "yaml" => serde_yaml::from_str::<JsonValue>(content).unwrap_or_else(|_| json!(content)),
        _ => json!(content),
    }
}

fn records_to_csv(rows: &[JsonValue]) -> Result<String, AgentFailure> {
    let Some(first) = rows.first().and_then(JsonValue::as_object) else {
        return Ok(String::new());
    };
    let columns: Vec<String> = first.keys().cloned().collect();

    let mut writer = csv::Writer::from_writer(Vec::new());
    writer
        .write_record(&columns)
        .map_err(|e| AgentFailure::Internal {
            message: e.to_string(),
        })?;
    for row in rows {
        let Some(object) = row.as_object() else {
            continue;
        };
        let record: Vec<String> = columns
            .iter()
            .map(|c| match object.get(c) {
                None | Some(JsonValue::Null) => String::new(),
                Some(JsonValue::String(s)) => s.clone(),
                Some(value) => value.to_string(),
            })
            .collect();
        writer
            .write_record(&record)
            .map_err(|e| AgentFailure::Internal {
                message: e.to_string(),
            })?;
    }
    let bytes = writer.into_inner().map_err(|e| AgentFailure::Internal {
        message: e.to_string(),
    })?;
    Ok(String::from_utf8_lossy(&bytes).to_string())
}

fn mime_type_of(path: &str) -> Option<&'static str> {
    let extension = Path::new(path)
        .extension()
        .map(|e| e.to_string_lossy().to_lowercase())?;
    match extension.as_str() {
        "json" => Some("application/json"),
        "csv" => Some("text/csv"),
        "txt" | "md" => Some("text/plain"),
        "html" | "htm" => Some("text/html"),
        "xml" => Some("application/xml"),
        "yaml" | "yml" => Some("application/yaml"),
        "zip" => Some("application/zip"),
        "pdf" => Some("application/pdf"),
        "png" => Some("image/png"),
        "jpg" | "jpeg" => Some("image/jpeg"),
        _ => None,
    }
}
