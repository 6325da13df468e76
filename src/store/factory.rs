//! Writer factory.

use std::path::{Path, PathBuf};
use std::sync::Arc;

use crate::config::{StoreConfig, WriterConfig};

use super::{FileWriter, MemoryWriter, MissedCallWriter};

/// Make a relative output directory absolute against the working directory.
fn resolve_output_dir(path: &Path) -> PathBuf {
    if path.is_absolute() {
        return path.to_path_buf();
    }
    std::env::current_dir()
        .unwrap_or_else(|_| PathBuf::from("."))
        .join(path)
}

/// Writers built from the store section.
pub struct WriterSet {
    pub writers: Vec<Arc<dyn MissedCallWriter>>,
    /// First memory writer, served by the admin API
    pub memory: Option<Arc<MemoryWriter>>,
}

/// Create the configured writers.
///
/// Each writer is named after its type and position, e.g. `file-0`, `memory-1`.
pub fn create_writers(config: &StoreConfig) -> anyhow::Result<WriterSet> {
    let mut writers: Vec<Arc<dyn MissedCallWriter>> = Vec::with_capacity(config.writers.len());
    let mut memory_log: Option<Arc<MemoryWriter>> = None;

    for (idx, writer) in config.writers.iter().enumerate() {
        match writer {
            WriterConfig::File(file) => {
                let dir = resolve_output_dir(&file.path);
                std::fs::create_dir_all(&dir)?;
                tracing::info!(
                    path = %dir.display(),
                    format = ?file.format,
                    rotate_daily = file.rotate_daily,
                    "using file writer"
                );
                writers.push(Arc::new(FileWriter::new(
                    &format!("file-{}", idx),
                    dir,
                    file.format,
                    file.rotate_daily,
                )));
            }
            WriterConfig::Memory(memory) => {
                tracing::info!(max_records = memory.max_records, "using in-memory writer (volatile)");
                let writer = Arc::new(MemoryWriter::new(
                    &format!("memory-{}", idx),
                    memory.max_records,
                ));
                memory_log.get_or_insert_with(|| writer.clone());
                writers.push(writer);
            }
        }
    }

    Ok(WriterSet {
        writers,
        memory: memory_log,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::{FileWriterConfig, MemoryWriterConfig};
    use crate::store::OutputFormat;
    use std::time::Duration;

    #[test]
    fn test_resolve_output_dir_absolute() {
        let path = Path::new("/custom/cdr/path");
        assert_eq!(resolve_output_dir(path), path);
    }

    #[test]
    fn test_resolve_output_dir_relative() {
        let resolved = resolve_output_dir(Path::new("./missed"));
        assert!(resolved.is_absolute() || resolved.starts_with("."));
        assert!(resolved.ends_with("missed"));
    }

    #[test]
    fn test_create_writers() {
        let dir = tempfile::tempdir().unwrap();
        let config = StoreConfig {
            queue_capacity: 10,
            flush_interval: Duration::from_secs(1),
            writers: vec![
                WriterConfig::File(FileWriterConfig {
                    path: dir.path().join("out"),
                    format: OutputFormat::Csv,
                    rotate_daily: true,
                }),
                WriterConfig::Memory(MemoryWriterConfig { max_records: 5 }),
            ],
        };

        let set = create_writers(&config).unwrap();
        assert_eq!(set.writers.len(), 2);
        assert_eq!(set.writers[0].name(), "file-0");
        assert_eq!(set.writers[1].name(), "memory-1");
        assert_eq!(set.memory.as_ref().map(|m| m.name()), Some("memory-1"));
        assert!(dir.path().join("out").is_dir());
    }

    #[test]
    fn test_file_only_has_no_memory_log() {
        let dir = tempfile::tempdir().unwrap();
        let config = StoreConfig {
            queue_capacity: 10,
            flush_interval: Duration::from_secs(1),
            writers: vec![WriterConfig::File(FileWriterConfig {
                path: dir.path().to_path_buf(),
                format: OutputFormat::Json,
                rotate_daily: false,
            })],
        };

        let set = create_writers(&config).unwrap();
        assert_eq!(set.writers.len(), 1);
        assert!(set.memory.is_none());
    }
}
