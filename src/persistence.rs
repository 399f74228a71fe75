//! 持久化模块
//!
//! 将整棵资源树序列化为 JSON 快照。写入是原子的：先写同目录下的临时文件并刷盘，
//! 再重命名覆盖目标文件，进程崩溃不会留下写了一半的快照。

use crate::error::PersistenceError;
use crate::model::{Resource, ResourceModel};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::io::ErrorKind;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use tokio::io::AsyncWriteExt;
use tokio::sync::RwLock;
use tracing::{debug, info, warn};

/// 快照格式版本
pub const SNAPSHOT_FORMAT_VERSION: u32 = 1;

/// 快照文件内容
#[derive(Debug, Clone, Serialize, Deserialize)]
struct SnapshotDocument {
    format_version: u32,
    saved_at: DateTime<Utc>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    label: Option<String>,
    #[serde(default)]
    root: Resource,
}

/// 归档快照信息
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SnapshotInfo {
    /// 快照ID（文件名去掉扩展名）
    pub id: String,
    /// 标签
    pub label: String,
    /// 创建时间
    pub created_at: DateTime<Utc>,
}

/// 编码资源模型
pub fn encode_snapshot(model: &ResourceModel, label: Option<&str>) -> Result<String, PersistenceError> {
    let document = SnapshotDocument {
        format_version: SNAPSHOT_FORMAT_VERSION,
        saved_at: Utc::now(),
        label: label.map(str::to_string),
        root: model.root().clone(),
    };
    serde_json::to_string_pretty(&document)
        .map_err(|e| PersistenceError::Io(format!("快照序列化失败: {e}")))
}

fn decode_document(content: &str) -> Result<SnapshotDocument, PersistenceError> {
    let document: SnapshotDocument =
        serde_json::from_str(content).map_err(|e| PersistenceError::Corrupt(e.to_string()))?;
    if document.format_version != SNAPSHOT_FORMAT_VERSION {
        return Err(PersistenceError::Corrupt(format!(
            "不支持的快照格式版本: {}",
            document.format_version
        )));
    }
    Ok(document)
}

/// 解码资源模型
pub fn decode_snapshot(content: &str) -> Result<ResourceModel, PersistenceError> {
    decode_document(content).map(|d| ResourceModel::from_root(d.root))
}

/// 快照存储trait
#[async_trait]
pub trait SnapshotStore: Send + Sync {
    /// 原子写入当前快照
    async fn write_snapshot(&self, model: &ResourceModel) -> Result<(), PersistenceError>;

    /// 读取当前快照
    async fn read_snapshot(&self) -> Result<ResourceModel, PersistenceError>;

    /// 将当前快照归档
    async fn archive(&self, label: &str) -> Result<SnapshotInfo, PersistenceError>;

    /// 列出归档快照（按时间排序）
    async fn list_archives(&self) -> Result<Vec<SnapshotInfo>, PersistenceError>;

    /// 读取归档快照
    async fn read_archive(&self, id: &str) -> Result<ResourceModel, PersistenceError>;
}

/// 基于文件的快照存储
#[derive(Debug, Clone)]
pub struct FileSnapshotStore {
    /// 快照文件路径
    path: PathBuf,
    /// 归档目录
    archive_dir: PathBuf,
}

impl FileSnapshotStore {
    /// 创建文件存储，归档目录默认为快照文件旁的 `snapshot/`
    pub fn new<P: AsRef<Path>>(path: P) -> Self {
        let path = path.as_ref().to_path_buf();
        let archive_dir = path
            .parent()
            .map(|p| p.join("snapshot"))
            .unwrap_or_else(|| PathBuf::from("snapshot"));
        Self { path, archive_dir }
    }

    pub fn with_archive_dir<P: AsRef<Path>>(mut self, dir: P) -> Self {
        self.archive_dir = dir.as_ref().to_path_buf();
        self
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn archive_dir(&self) -> &Path {
        &self.archive_dir
    }

    /// 原子写入：临时文件 + fsync + rename，再 fsync 所在目录使 rename 落盘
    async fn write_atomically(target: &Path, content: &str) -> Result<(), PersistenceError> {
        if let Some(parent) = target.parent() {
            if !parent.as_os_str().is_empty() {
                tokio::fs::create_dir_all(parent).await?;
            }
        }

        let file_name = target
            .file_name()
            .map(|n| n.to_string_lossy().to_string())
            .ok_or_else(|| PersistenceError::Io(format!("无效的快照路径: {}", target.display())))?;
        let tmp_path = target.with_file_name(format!(".{file_name}.tmp"));

        let result = async {
            let mut file = tokio::fs::File::create(&tmp_path).await?;
            file.write_all(content.as_bytes()).await?;
            file.sync_all().await?;
            drop(file);
            tokio::fs::rename(&tmp_path, target).await?;
            Self::sync_parent_dir(target).await
        }
        .await;

        if let Err(e) = result {
            if let Err(cleanup) = tokio::fs::remove_file(&tmp_path).await {
                debug!("清理临时快照文件失败: {}", cleanup);
            }
            return Err(PersistenceError::Io(format!(
                "写入快照 {} 失败: {}",
                target.display(),
                e
            )));
        }
        Ok(())
    }

    #[cfg(unix)]
    async fn sync_parent_dir(target: &Path) -> std::io::Result<()> {
        let parent = match target.parent() {
            Some(p) if !p.as_os_str().is_empty() => p,
            _ => Path::new("."),
        };
        tokio::fs::File::open(parent).await?.sync_all().await
    }

    #[cfg(not(unix))]
    async fn sync_parent_dir(_target: &Path) -> std::io::Result<()> {
        Ok(())
    }

    async fn read_file(path: &Path) -> Result<String, PersistenceError> {
        match tokio::fs::read_to_string(path).await {
            Ok(content) => Ok(content),
            Err(e) if e.kind() == ErrorKind::NotFound => Err(PersistenceError::NotFound {
                path: path.to_string_lossy().to_string(),
            }),
            Err(e) => Err(e.into()),
        }
    }

    fn archive_path(&self, id: &str) -> Result<PathBuf, PersistenceError> {
        if id.is_empty() || id.contains('/') || id.contains('\\') || id.contains("..") {
            return Err(PersistenceError::NotFound { path: id.to_string() });
        }
        Ok(self.archive_dir.join(format!("{id}.json")))
    }
}

#[async_trait]
impl SnapshotStore for FileSnapshotStore {
    async fn write_snapshot(&self, model: &ResourceModel) -> Result<(), PersistenceError> {
        let content = encode_snapshot(model, None)?;
        Self::write_atomically(&self.path, &content).await?;
        debug!("快照已写入: {}", self.path.display());
        Ok(())
    }

    async fn read_snapshot(&self) -> Result<ResourceModel, PersistenceError> {
        let content = Self::read_file(&self.path).await?;
        let model = decode_snapshot(&content)?;
        debug!("快照已读取: {}", self.path.display());
        Ok(model)
    }

    async fn archive(&self, label: &str) -> Result<SnapshotInfo, PersistenceError> {
        let model = self.read_snapshot().await?;
        let label = sanitize_label(label);
        let created_at = Utc::now();
        let id = format!("{}-{}", created_at.format("%Y%m%dT%H%M%S%.3f"), label);

        let content = encode_snapshot(&model, Some(&label))?;
        Self::write_atomically(&self.archive_path(&id)?, &content).await?;

        info!("快照已归档: {}", id);
        Ok(SnapshotInfo {
            id,
            label,
            created_at,
        })
    }

    async fn list_archives(&self) -> Result<Vec<SnapshotInfo>, PersistenceError> {
        let mut entries = match tokio::fs::read_dir(&self.archive_dir).await {
            Ok(entries) => entries,
            Err(e) if e.kind() == ErrorKind::NotFound => return Ok(Vec::new()),
            Err(e) => return Err(e.into()),
        };

        let mut archives = Vec::new();
        while let Some(entry) = entries.next_entry().await? {
            let path = entry.path();
            if path.extension().and_then(|e| e.to_str()) != Some("json") {
                continue;
            }
            let Some(id) = path.file_stem().map(|s| s.to_string_lossy().to_string()) else {
                continue;
            };

            match Self::read_file(&path).await.and_then(|c| decode_document(&c)) {
                Ok(document) => archives.push(SnapshotInfo {
                    id,
                    label: document.label.unwrap_or_default(),
                    created_at: document.saved_at,
                }),
                Err(e) => warn!("跳过无法解析的归档快照 {}: {}", path.display(), e),
            }
        }

        archives.sort_by(|a, b| a.created_at.cmp(&b.created_at).then(a.id.cmp(&b.id)));
        Ok(archives)
    }

    async fn read_archive(&self, id: &str) -> Result<ResourceModel, PersistenceError> {
        let content = Self::read_file(&self.archive_path(id)?).await?;
        decode_snapshot(&content)
    }
}

fn sanitize_label(label: &str) -> String {
    let cleaned: String = label
        .chars()
        .map(|c| if c.is_ascii_alphanumeric() || c == '-' || c == '_' { c } else { '_' })
        .collect();
    if cleaned.is_empty() {
        "snapshot".to_string()
    } else {
        cleaned
    }
}

/// 内存快照存储，可注入写入失败，用于测试
#[derive(Debug, Default)]
pub struct MemorySnapshotStore {
    current: RwLock<Option<String>>,
    archives: RwLock<Vec<(SnapshotInfo, String)>>,
    fail_writes: AtomicBool,
    writes: AtomicUsize,
}

impl MemorySnapshotStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// 以已有模型初始化
    pub fn with_model(model: &ResourceModel) -> Result<Self, PersistenceError> {
        let store = Self::new();
        *store.current.try_write().map_err(|e| PersistenceError::Io(e.to_string()))? =
            Some(encode_snapshot(model, None)?);
        Ok(store)
    }

    /// 设置后续写入是否失败
    pub fn set_fail_writes(&self, fail: bool) {
        self.fail_writes.store(fail, Ordering::SeqCst);
    }

    /// 成功写入的次数
    pub fn write_count(&self) -> usize {
        self.writes.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl SnapshotStore for MemorySnapshotStore {
    async fn write_snapshot(&self, model: &ResourceModel) -> Result<(), PersistenceError> {
        if self.fail_writes.load(Ordering::SeqCst) {
            return Err(PersistenceError::Io("注入的写入失败".to_string()));
        }
        let content = encode_snapshot(model, None)?;
        *self.current.write().await = Some(content);
        self.writes.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }

    async fn read_snapshot(&self) -> Result<ResourceModel, PersistenceError> {
        match self.current.read().await.as_deref() {
            Some(content) => decode_snapshot(content),
            None => Err(PersistenceError::NotFound {
                path: "memory".to_string(),
            }),
        }
    }

    async fn archive(&self, label: &str) -> Result<SnapshotInfo, PersistenceError> {
        let content = self
            .current
            .read()
            .await
            .clone()
            .ok_or_else(|| PersistenceError::NotFound {
                path: "memory".to_string(),
            })?;

        let mut archives = self.archives.write().await;
        let label = sanitize_label(label);
        let info = SnapshotInfo {
            id: format!("{}-{}", archives.len() + 1, label),
            label,
            created_at: Utc::now(),
        };
        archives.push((info.clone(), content));
        Ok(info)
    }

    async fn list_archives(&self) -> Result<Vec<SnapshotInfo>, PersistenceError> {
        Ok(self
            .archives
            .read()
            .await
            .iter()
            .map(|(info, _)| info.clone())
            .collect())
    }

    async fn read_archive(&self, id: &str) -> Result<ResourceModel, PersistenceError> {
        let archives = self.archives.read().await;
        let (_, content) = archives
            .iter()
            .find(|(info, _)| info.id == id)
            .ok_or_else(|| PersistenceError::NotFound { path: id.to_string() })?;
        decode_snapshot(content)
    }
}
