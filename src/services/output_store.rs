//! 结果汇总 - 业务能力层
//!
//! ## 职责
//!
//! - 每个章节写一个 `<科目>/<章节>_mcqs.json`
//! - 每记录 N 个章节写一次科目合集 `<科目>/<科目>_all_mcqs.json`
//! - 扫描输出目录，统计各科目题目数与目标的差距
//!
//! 所有写入都是先写临时文件再重命名，重复写入结果相同。

use std::collections::{HashMap, HashSet};
use std::path::{Path, PathBuf};

use serde::Serialize;
use serde_json::Value;
use tokio::sync::Mutex;
use tracing::{debug, info, warn};

use crate::error::{AppError, AppResult};
use crate::models::mcq::Mcq;
use crate::models::unit_result::UnitResult;

const UNIT_FILE_SUFFIX: &str = "_mcqs.json";
const COMBINED_FILE_SUFFIX: &str = "_all_mcqs.json";

/// 一个科目已记录的章节
#[derive(Debug, Default)]
struct SubjectCollection {
    /// 按记录顺序保存 (章节名, 题目)
    units: Vec<(String, Vec<Mcq>)>,
    recorded: usize,
}

impl SubjectCollection {
    fn upsert(&mut self, unit: &str, items: Vec<Mcq>) {
        match self.units.iter_mut().find(|(name, _)| name == unit) {
            Some(entry) => entry.1 = items,
            None => self.units.push((unit.to_string(), items)),
        }
        self.recorded += 1;
    }

    /// 移除章节，返回之前是否存在
    fn remove(&mut self, unit: &str) -> bool {
        let before = self.units.len();
        self.units.retain(|(name, _)| name != unit);
        self.units.len() != before
    }

    fn total(&self) -> usize {
        self.units.iter().map(|(_, items)| items.len()).sum()
    }

    fn distinct_sources(&self) -> usize {
        self.units
            .iter()
            .flat_map(|(_, items)| items)
            .map(|m| m.provenance.source.as_str())
            .collect::<HashSet<_>>()
            .len()
    }
}

/// 科目合集文件内容
#[derive(Debug, Serialize)]
struct CombinedSnapshot<'a> {
    subject: &'a str,
    total_mcqs: usize,
    /// 不同来源章节的数量
    chapters_included: usize,
    mcqs: Vec<&'a Mcq>,
}

/// 记录结果
#[derive(Debug, Clone, PartialEq)]
pub struct RecordOutcome {
    pub unit_file: Option<PathBuf>,
    /// 该科目当前累计题目数
    pub subject_total: usize,
}

/// 输出汇总器
pub struct OutputStore {
    root: PathBuf,
    snapshot_every: usize,
    subjects: Mutex<HashMap<String, SubjectCollection>>,
}

impl OutputStore {
    pub fn new(root: impl Into<PathBuf>, snapshot_every: usize) -> Self {
        Self {
            root: root.into(),
            snapshot_every,
            subjects: Mutex::new(HashMap::new()),
        }
    }

    /// 记录一个章节的结果
    ///
    /// 没有题目的章节不写文件；同一章节再次记录时覆盖之前的结果，
    /// 再次记录为空时删除之前写出的文件
    pub async fn record(&self, result: &UnitResult) -> AppResult<RecordOutcome> {
        let subject = &result.unit.subject;
        let unit = &result.unit.name;
        let mut subjects = self.subjects.lock().await;

        if result.items.is_empty() {
            warn!("⚠️ [{}/{}] 没有题目，不写入文件", subject, unit);
            let removed = subjects
                .get_mut(subject)
                .is_some_and(|collection| collection.remove(unit));
            if removed {
                let stale = self.unit_path(subject, unit);
                match tokio::fs::remove_file(&stale).await {
                    Ok(()) => info!("🗑️ [{}/{}] 已删除旧结果 {}", subject, unit, stale.display()),
                    Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
                    Err(e) => return Err(AppError::io(&stale, e)),
                }
            }
            let subject_total = subjects.get(subject).map(|c| c.total()).unwrap_or(0);
            return Ok(RecordOutcome {
                unit_file: None,
                subject_total,
            });
        }

        let unit_file = self.unit_path(subject, unit);
        write_json_atomic(&unit_file, &result.items).await?;
        info!(
            "💾 [{}/{}] 已保存 {} 道题 → {}",
            subject,
            unit,
            result.items.len(),
            unit_file.display()
        );

        let collection = subjects.entry(subject.clone()).or_default();
        collection.upsert(unit, result.items.clone());
        let subject_total = collection.total();

        if self.snapshot_every > 0 && collection.recorded % self.snapshot_every == 0 {
            self.write_snapshot(subject, collection).await?;
        }

        Ok(RecordOutcome {
            unit_file: Some(unit_file),
            subject_total,
        })
    }

    /// 写出所有科目合集
    pub async fn flush(&self) -> AppResult<()> {
        let subjects = self.subjects.lock().await;
        for (subject, collection) in subjects.iter() {
            self.write_snapshot(subject, collection).await?;
        }
        Ok(())
    }

    /// 科目当前累计题目数
    pub async fn subject_total(&self, subject: &str) -> usize {
        self.subjects
            .lock()
            .await
            .get(subject)
            .map(|c| c.total())
            .unwrap_or(0)
    }

    async fn write_snapshot(&self, subject: &str, collection: &SubjectCollection) -> AppResult<()> {
        let snapshot = CombinedSnapshot {
            subject,
            total_mcqs: collection.total(),
            chapters_included: collection.distinct_sources(),
            mcqs: collection.units.iter().flat_map(|(_, items)| items).collect(),
        };
        let path = self
            .root
            .join(subject)
            .join(format!("{}{}", subject, COMBINED_FILE_SUFFIX));
        write_json_atomic(&path, &snapshot).await?;
        info!(
            "📚 [{}] 科目合集已更新: {} 个章节，共 {} 道题",
            subject,
            snapshot.chapters_included,
            snapshot.total_mcqs
        );
        Ok(())
    }

    fn unit_path(&self, subject: &str, unit: &str) -> PathBuf {
        self.root
            .join(subject)
            .join(format!("{}{}", unit, UNIT_FILE_SUFFIX))
    }
}

/// 先写临时文件再重命名
async fn write_json_atomic<T: Serialize + ?Sized>(path: &Path, value: &T) -> AppResult<()> {
    if let Some(parent) = path.parent() {
        tokio::fs::create_dir_all(parent)
            .await
            .map_err(|e| AppError::io(parent, e))?;
    }

    let bytes = serde_json::to_vec_pretty(value)?;
    let mut tmp = path.as_os_str().to_owned();
    tmp.push(".tmp");
    let tmp = PathBuf::from(tmp);

    tokio::fs::write(&tmp, &bytes)
        .await
        .map_err(|e| AppError::io(&tmp, e))?;
    tokio::fs::rename(&tmp, path)
        .await
        .map_err(|e| AppError::io(path, e))?;
    debug!("写入 {} ({} 字节)", path.display(), bytes.len());
    Ok(())
}

// ========== 库存统计 ==========

/// 单个科目的统计
#[derive(Debug, Clone, PartialEq)]
pub struct SubjectInventory {
    pub subject: String,
    /// 有输出文件的章节数
    pub units: usize,
    pub total: usize,
    pub target: usize,
}

impl SubjectInventory {
    /// 距离目标还差多少题
    pub fn deficit(&self) -> usize {
        self.target.saturating_sub(self.total)
    }
}

/// 输出目录统计报告
#[derive(Debug, Clone, Default, PartialEq)]
pub struct InventoryReport {
    /// 按科目名排序
    pub subjects: Vec<SubjectInventory>,
}

impl InventoryReport {
    pub fn grand_total(&self) -> usize {
        self.subjects.iter().map(|s| s.total).sum()
    }

    /// 未达标的科目
    pub fn deficits(&self) -> impl Iterator<Item = &SubjectInventory> {
        self.subjects.iter().filter(|s| s.deficit() > 0)
    }
}

/// 扫描输出目录，统计每个科目的题目数
///
/// `target_for` 返回科目的目标题目数
pub async fn inventory<F>(root: &Path, target_for: F) -> AppResult<InventoryReport>
where
    F: Fn(&str) -> usize,
{
    let mut report = InventoryReport::default();
    if !root.exists() {
        return Ok(report);
    }

    let mut dirs = tokio::fs::read_dir(root)
        .await
        .map_err(|e| AppError::io(root, e))?;
    let mut subject_dirs = Vec::new();
    while let Some(entry) = dirs.next_entry().await.map_err(|e| AppError::io(root, e))? {
        if entry.path().is_dir() {
            subject_dirs.push((entry.file_name().to_string_lossy().to_string(), entry.path()));
        }
    }
    subject_dirs.sort();

    for (subject, dir) in subject_dirs {
        let (units, total) = count_subject(&subject, &dir).await?;
        report.subjects.push(SubjectInventory {
            target: target_for(&subject),
            subject,
            units,
            total,
        });
    }
    Ok(report)
}

async fn count_subject(subject: &str, dir: &Path) -> AppResult<(usize, usize)> {
    let combined = format!("{}{}", subject, COMBINED_FILE_SUFFIX);
    let mut entries = tokio::fs::read_dir(dir)
        .await
        .map_err(|e| AppError::io(dir, e))?;
    let mut units = 0;
    let mut total = 0;

    while let Some(entry) = entries.next_entry().await.map_err(|e| AppError::io(dir, e))? {
        let name = entry.file_name().to_string_lossy().to_string();
        if !name.ends_with(UNIT_FILE_SUFFIX) || name == combined {
            continue;
        }

        let path = entry.path();
        let content = tokio::fs::read_to_string(&path)
            .await
            .map_err(|e| AppError::io(&path, e))?;
        match serde_json::from_str::<Vec<Value>>(&content) {
            Ok(items) => {
                units += 1;
                total += items.len();
            }
            Err(e) => warn!("⚠️ 无法读取输出文件 {}: {}", path.display(), e),
        }
    }
    Ok((units, total))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::mcq::{mcq_id, Difficulty, McqDraft, Provenance, OPTION_LABELS};
    use crate::models::unit_result::UnitStatus;
    use crate::models::work_unit::WorkUnit;

    fn result(subject: &str, unit: &str, count: usize) -> UnitResult {
        let items = (1..=count)
            .map(|seq| {
                let draft = McqDraft {
                    question: format!("Q{}", seq),
                    options: OPTION_LABELS
                        .iter()
                        .map(|l| (l.to_string(), l.to_lowercase()))
                        .collect(),
                    correct_answer: "A".to_string(),
                    explanation: String::new(),
                    difficulty: Difficulty::Medium,
                    topic: "t".to_string(),
                    subtopic: String::new(),
                    tags: vec!["t".to_string()],
                    learning_objective: "Understand t".to_string(),
                };
                let provenance = Provenance {
                    source: format!("{}.pdf", unit),
                    created_date: "2024-01-01T00:00:00Z".to_string(),
                    ai_generated: true,
                    reviewed: false,
                    quality_score: 0.9,
                };
                Mcq::new(mcq_id(subject, unit, seq), draft, provenance)
            })
            .collect();

        UnitResult {
            unit: WorkUnit {
                subject: subject.to_string(),
                name: unit.to_string(),
                source_path: PathBuf::from(format!("{}.pdf", unit)),
                target: count,
                size_bytes: 0,
            },
            items,
            attempts: 1,
            dropped: 0,
            status: UnitStatus::Completed,
        }
    }

    #[tokio::test]
    async fn test_record_writes_unit_file_and_snapshot() {
        let dir = tempfile::tempdir().unwrap();
        let store = OutputStore::new(dir.path(), 2);

        let first = store.record(&result("chem", "ch1", 3)).await.unwrap();
        assert_eq!(first.subject_total, 3);
        let unit_file = dir.path().join("chem/ch1_mcqs.json");
        assert_eq!(first.unit_file.as_deref(), Some(unit_file.as_path()));

        let saved: Vec<Mcq> =
            serde_json::from_str(&std::fs::read_to_string(&unit_file).unwrap()).unwrap();
        assert_eq!(saved.len(), 3);
        assert_eq!(saved[0].id, "chem_ch1_mcq_001");

        let combined = dir.path().join("chem/chem_all_mcqs.json");
        assert!(!combined.exists());

        store.record(&result("chem", "ch2", 2)).await.unwrap();
        let snapshot: Value =
            serde_json::from_str(&std::fs::read_to_string(&combined).unwrap()).unwrap();
        assert_eq!(snapshot["subject"], "chem");
        assert_eq!(snapshot["total_mcqs"], 5);
        assert_eq!(snapshot["chapters_included"], 2);
        assert_eq!(snapshot["mcqs"].as_array().unwrap().len(), 5);
    }

    #[tokio::test]
    async fn test_rerecording_a_unit_replaces_it() {
        let dir = tempfile::tempdir().unwrap();
        let store = OutputStore::new(dir.path(), 3);

        store.record(&result("bio", "ch1", 4)).await.unwrap();
        let again = store.record(&result("bio", "ch1", 2)).await.unwrap();
        assert_eq!(again.subject_total, 2);
        assert_eq!(store.subject_total("bio").await, 2);

        store.flush().await.unwrap();
        let snapshot: Value = serde_json::from_str(
            &std::fs::read_to_string(dir.path().join("bio/bio_all_mcqs.json")).unwrap(),
        )
        .unwrap();
        assert_eq!(snapshot["total_mcqs"], 2);
    }

    #[tokio::test]
    async fn test_empty_result_writes_nothing() {
        let dir = tempfile::tempdir().unwrap();
        let store = OutputStore::new(dir.path(), 1);
        let outcome = store.record(&result("phy", "ch1", 0)).await.unwrap();
        assert_eq!(outcome.unit_file, None);
        assert!(!dir.path().join("phy").exists());
    }

    #[tokio::test]
    async fn test_empty_rerecord_removes_stale_unit() {
        let dir = tempfile::tempdir().unwrap();
        let store = OutputStore::new(dir.path(), 10);
        store.record(&result("chem", "ch1", 3)).await.unwrap();
        store.record(&result("chem", "ch2", 2)).await.unwrap();
        assert!(dir.path().join("chem/ch1_mcqs.json").exists());

        let outcome = store.record(&result("chem", "ch1", 0)).await.unwrap();
        assert_eq!(outcome.unit_file, None);
        assert_eq!(outcome.subject_total, 2);
        assert!(!dir.path().join("chem/ch1_mcqs.json").exists());

        store.flush().await.unwrap();
        let snapshot: Value = serde_json::from_str(
            &std::fs::read_to_string(dir.path().join("chem/chem_all_mcqs.json")).unwrap(),
        )
        .unwrap();
        assert_eq!(snapshot["total_mcqs"], 2);
        assert_eq!(snapshot["chapters_included"], 1);
    }

    #[tokio::test]
    async fn test_inventory_counts_units_ending_in_all() {
        let dir = tempfile::tempdir().unwrap();
        let store = OutputStore::new(dir.path(), 1);
        store.record(&result("chem", "review_all", 4)).await.unwrap();
        store.record(&result("chem", "ch1", 3)).await.unwrap();
        assert!(dir.path().join("chem/chem_all_mcqs.json").exists());

        let report = inventory(dir.path(), |_| 10).await.unwrap();
        let chem = &report.subjects[0];
        assert_eq!((chem.units, chem.total), (2, 7));
    }

    #[tokio::test]
    async fn test_inventory_reports_deficits() {
        let dir = tempfile::tempdir().unwrap();
        let store = OutputStore::new(dir.path(), 1);
        store.record(&result("chem", "ch1", 3)).await.unwrap();
        store.record(&result("chem", "ch2", 4)).await.unwrap();
        store.record(&result("phy", "ch1", 5)).await.unwrap();
        std::fs::write(dir.path().join("phy/broken_mcqs.json"), "{not json").unwrap();

        let report = inventory(dir.path(), |s| if s == "chem" { 10 } else { 5 })
            .await
            .unwrap();

        assert_eq!(report.grand_total(), 12);
        let chem = &report.subjects[0];
        assert_eq!((chem.units, chem.total, chem.deficit()), (2, 7, 3));
        let deficits: Vec<_> = report.deficits().map(|s| s.subject.as_str()).collect();
        assert_eq!(deficits, vec!["chem"]);
    }
}
