use crate::config::Config;
use crate::models::work_unit::WorkUnit;
use anyhow::{Context, Result};
use std::path::Path;
use tokio::fs;

/// 预处理生成的中间文件后缀，扫描时忽略
const INTERMEDIATE_MARKERS: [&str; 2] = ["_compressed", "_chunk"];

/// 扫描教材目录，列出所有待处理的章节
///
/// 目录结构：`<books_dir>/<科目>/<章节>.pdf`，结果按科目、章节名排序
pub async fn load_all_units(config: &Config) -> Result<Vec<WorkUnit>> {
    let books_dir = &config.books_dir;

    if !books_dir.exists() {
        anyhow::bail!("教材目录不存在: {}", books_dir.display());
    }

    let mut subject_dirs = Vec::new();
    let mut entries = fs::read_dir(books_dir)
        .await
        .with_context(|| format!("无法读取文件夹: {}", books_dir.display()))?;

    while let Some(entry) = entries.next_entry().await? {
        let path = entry.path();
        if !path.is_dir() {
            continue;
        }
        let name = entry.file_name().to_string_lossy().to_string();
        if name.ends_with(&config.subject_dir_suffix) {
            subject_dirs.push((name, path));
        }
    }
    subject_dirs.sort();

    let mut units = Vec::new();
    for (subject, dir) in subject_dirs {
        let subject_units = load_subject_units(&subject, &dir, config).await?;
        tracing::info!("科目 {}: 找到 {} 个章节", subject, subject_units.len());
        units.extend(subject_units);
    }

    Ok(units)
}

/// 列出单个科目目录下的章节
pub async fn load_subject_units(
    subject: &str,
    dir: &Path,
    config: &Config,
) -> Result<Vec<WorkUnit>> {
    let skip = config.skip_files.get(subject);
    let mut units = Vec::new();
    let mut entries = fs::read_dir(dir)
        .await
        .with_context(|| format!("无法读取文件夹: {}", dir.display()))?;

    while let Some(entry) = entries.next_entry().await? {
        let path = entry.path();
        if path.extension().and_then(|s| s.to_str()) != Some("pdf") {
            continue;
        }

        let file_name = entry.file_name().to_string_lossy().to_string();
        if skip.is_some_and(|list| list.contains(&file_name)) {
            tracing::info!("跳过配置排除的文件: {}/{}", subject, file_name);
            continue;
        }

        let stem = path
            .file_stem()
            .map(|s| s.to_string_lossy().to_string())
            .unwrap_or_default();
        if INTERMEDIATE_MARKERS.iter().any(|m| stem.contains(m)) {
            continue;
        }

        let size_bytes = entry.metadata().await?.len();
        units.push(WorkUnit {
            subject: subject.to_string(),
            name: stem,
            source_path: path,
            target: config.target_per_unit,
            size_bytes,
        });
    }

    units.sort_by(|a, b| a.name.cmp(&b.name));
    Ok(units)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    #[tokio::test]
    async fn test_load_units_filters_and_sorts() {
        let dir = tempfile::tempdir().unwrap();
        let chem = dir.path().join("chemistry_chapters");
        let other = dir.path().join("notes");
        std::fs::create_dir_all(&chem).unwrap();
        std::fs::create_dir_all(&other).unwrap();

        std::fs::write(chem.join("ch2.pdf"), b"%PDF-1.5 two").unwrap();
        std::fs::write(chem.join("ch1.pdf"), b"%PDF-1.5 one").unwrap();
        std::fs::write(chem.join("ch3.pdf"), b"%PDF-1.5 big").unwrap();
        std::fs::write(chem.join("ch1_compressed.pdf"), b"%PDF").unwrap();
        std::fs::write(chem.join("readme.txt"), b"text").unwrap();
        std::fs::write(other.join("ch9.pdf"), b"%PDF").unwrap();

        let config = Config {
            books_dir: dir.path().to_path_buf(),
            target_per_unit: 20,
            skip_files: HashMap::from([(
                "chemistry_chapters".to_string(),
                vec!["ch3.pdf".to_string()],
            )]),
            ..Config::default()
        };

        let units = load_all_units(&config).await.unwrap();
        let names: Vec<_> = units.iter().map(|u| u.name.as_str()).collect();
        assert_eq!(names, vec!["ch1", "ch2"]);
        assert!(units.iter().all(|u| u.subject == "chemistry_chapters"));
        assert!(units.iter().all(|u| u.target == 20));
        assert_eq!(units[0].size_bytes, 12);
    }

    #[tokio::test]
    async fn test_missing_books_dir_is_error() {
        let config = Config {
            books_dir: "/definitely/not/here".into(),
            ..Config::default()
        };
        assert!(load_all_units(&config).await.is_err());
    }
}
