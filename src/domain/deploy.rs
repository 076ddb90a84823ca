//! 部署阶段领域模型

use chrono::{DateTime, Utc};
use serde::Serialize;

/// 部署结果
#[derive(Clone, Copy, Debug, Serialize, PartialEq)]
#[serde(rename_all = "snake_case")]
pub enum DeployStatus {
    Success,
    Failed,
}

impl DeployStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            DeployStatus::Success => "success",
            DeployStatus::Failed => "failed",
        }
    }
}

/// 阶段状态
#[derive(Clone, Copy, Debug, Serialize, PartialEq)]
#[serde(rename_all = "snake_case")]
pub enum StageStatus {
    Pending,
    Running,
    Success,
    Failed,
    Skipped,
}

impl StageStatus {
    pub fn icon(&self) -> &'static str {
        match self {
            StageStatus::Success => "✓",
            StageStatus::Failed => "✗",
            StageStatus::Skipped => "⊘",
            StageStatus::Running => "⟳",
            StageStatus::Pending => "○",
        }
    }
}

/// 编排器的固定阶段，顺序即执行顺序
#[derive(Clone, Copy, Debug, Serialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum Stage {
    AcquireLock,
    PrepareLogs,
    StopRelease,
    Unlink,
    CopyRelease,
    InitServer,
    InjectSecrets,
    MaintenanceOn,
    EnsureDatabases,
    ExportUsers,
    BackupDatabase,
    ImportRealm,
    ImportUsers,
    MaintenanceOff,
    Link,
    StartServer,
    ReleaseLock,
}

impl Stage {
    pub const ALL: [Stage; 17] = [
        Stage::AcquireLock,
        Stage::PrepareLogs,
        Stage::StopRelease,
        Stage::Unlink,
        Stage::CopyRelease,
        Stage::InitServer,
        Stage::InjectSecrets,
        Stage::MaintenanceOn,
        Stage::EnsureDatabases,
        Stage::ExportUsers,
        Stage::BackupDatabase,
        Stage::ImportRealm,
        Stage::ImportUsers,
        Stage::MaintenanceOff,
        Stage::Link,
        Stage::StartServer,
        Stage::ReleaseLock,
    ];

    pub fn name(&self) -> &'static str {
        match self {
            Stage::AcquireLock => "acquire_lock",
            Stage::PrepareLogs => "prepare_logs",
            Stage::StopRelease => "stop_release",
            Stage::Unlink => "unlink",
            Stage::CopyRelease => "copy_release",
            Stage::InitServer => "init_server",
            Stage::InjectSecrets => "inject_secrets",
            Stage::MaintenanceOn => "maintenance_on",
            Stage::EnsureDatabases => "ensure_databases",
            Stage::ExportUsers => "export_users",
            Stage::BackupDatabase => "backup_database",
            Stage::ImportRealm => "import_realm",
            Stage::ImportUsers => "import_users",
            Stage::MaintenanceOff => "maintenance_off",
            Stage::Link => "link",
            Stage::StartServer => "start_server",
            Stage::ReleaseLock => "release_lock",
        }
    }

    pub fn display_name(&self) -> &'static str {
        match self {
            Stage::AcquireLock => "Acquire Deploy Lock",
            Stage::PrepareLogs => "Prepare Logs Directory",
            Stage::StopRelease => "Stop Active Release",
            Stage::Unlink => "Unlink Active Release",
            Stage::CopyRelease => "Copy Release",
            Stage::InitServer => "Init Server",
            Stage::InjectSecrets => "Inject Secrets",
            Stage::MaintenanceOn => "Show Maintenance Page",
            Stage::EnsureDatabases => "Ensure Databases",
            Stage::ExportUsers => "Export Keycloak Users",
            Stage::BackupDatabase => "Backup Keycloak Database",
            Stage::ImportRealm => "Import Keycloak Realm",
            Stage::ImportUsers => "Import Keycloak Users",
            Stage::MaintenanceOff => "Hide Maintenance Page",
            Stage::Link => "Link Release",
            Stage::StartServer => "Start Server",
            Stage::ReleaseLock => "Release Deploy Lock",
        }
    }
}

/// 单个阶段的执行记录
#[derive(Clone, Debug, Serialize)]
pub struct DeployStage {
    pub stage: Stage,
    pub status: StageStatus,
    pub started_at: Option<DateTime<Utc>>,
    /// 持续时间（毫秒），未开始的阶段为空
    pub duration_ms: Option<i64>,
    pub message: Option<String>,
}

impl DeployStage {
    fn pending(stage: Stage) -> Self {
        Self {
            stage,
            status: StageStatus::Pending,
            started_at: None,
            duration_ms: None,
            message: None,
        }
    }

    fn complete(&mut self, status: StageStatus, message: Option<String>) {
        self.status = status;
        self.message = message;
        self.duration_ms = self
            .started_at
            .map(|started| (Utc::now() - started).num_milliseconds());
    }

    /// 摘要行，例如 `✓ Copy Release (812ms)`
    pub fn summary_line(&self) -> String {
        let duration = self
            .duration_ms
            .map_or_else(|| "-".to_string(), |d| format!("{}ms", d));
        let line = format!("{} {} ({})", self.status.icon(), self.stage.display_name(), duration);
        match &self.message {
            Some(message) => format!("{} - {}", line, message),
            None => line,
        }
    }
}

/// 按固定顺序记录所有阶段
#[derive(Clone, Debug)]
pub struct StageTracker {
    stages: Vec<DeployStage>,
}

impl Default for StageTracker {
    fn default() -> Self {
        Self::new()
    }
}

impl StageTracker {
    pub fn new() -> Self {
        Self {
            stages: Stage::ALL.iter().copied().map(DeployStage::pending).collect(),
        }
    }

    fn get_mut(&mut self, stage: Stage) -> Option<&mut DeployStage> {
        self.stages.iter_mut().find(|s| s.stage == stage)
    }

    fn complete(&mut self, stage: Stage, status: StageStatus, message: Option<String>) {
        if let Some(record) = self.get_mut(stage) {
            record.complete(status, message);
        }
    }

    pub fn start(&mut self, stage: Stage) {
        tracing::info!(stage = stage.name(), "=== {} ===", stage.display_name());
        if let Some(record) = self.get_mut(stage) {
            record.started_at = Some(Utc::now());
            record.status = StageStatus::Running;
        }
    }

    pub fn succeed(&mut self, stage: Stage) {
        self.complete(stage, StageStatus::Success, None);
    }

    pub fn succeed_with(&mut self, stage: Stage, message: impl Into<String>) {
        self.complete(stage, StageStatus::Success, Some(message.into()));
    }

    pub fn fail(&mut self, stage: Stage, message: impl Into<String>) {
        self.complete(stage, StageStatus::Failed, Some(message.into()));
    }

    pub fn skip(&mut self, stage: Stage, reason: impl Into<String>) {
        self.complete(stage, StageStatus::Skipped, Some(reason.into()));
    }

    /// 若阶段仍在运行中，标记为失败
    pub fn fail_running(&mut self, message: &str) {
        for record in self.stages.iter_mut() {
            if record.status == StageStatus::Running {
                record.complete(StageStatus::Failed, Some(message.to_string()));
            }
        }
    }

    pub fn status(&self, stage: Stage) -> StageStatus {
        self.stages
            .iter()
            .find(|s| s.stage == stage)
            .map_or(StageStatus::Pending, |s| s.status)
    }

    pub fn stages(&self) -> Vec<DeployStage> {
        self.stages.clone()
    }

    pub fn summary_lines(&self) -> Vec<String> {
        self.stages.iter().map(DeployStage::summary_line).collect()
    }
}
