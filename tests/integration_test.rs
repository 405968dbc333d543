use batch_mcq::config::Config;
use batch_mcq::infrastructure::KeyPool;
use batch_mcq::models::Mcq;
use batch_mcq::testing::{sample_reply, ScriptedBackend};
use batch_mcq::{logger, App};
use std::collections::HashMap;
use std::path::Path;
use std::sync::Arc;
use tokio_test::assert_ok;

/// 在临时目录中搭建教材目录结构
fn write_books(root: &Path, layout: &[(&str, &[&str])]) {
    for (subject, units) in layout {
        let dir = root.join("books").join(subject);
        std::fs::create_dir_all(&dir).unwrap();
        for unit in *units {
            std::fs::write(dir.join(format!("{}.pdf", unit)), b"%PDF-1.5 chapter").unwrap();
        }
    }
}

fn test_config(root: &Path) -> Config {
    Config {
        books_dir: root.join("books"),
        output_dir: root.join("mcq_output"),
        work_dir: root.join("mcq_work"),
        output_log_file: root.join("output.txt").to_string_lossy().to_string(),
        max_workers: 1,
        inter_call_delay_ms: 0,
        backoff_step_ms: 1,
        poll_interval_ms: 1,
        ..Config::default()
    }
}

fn two_keys(quota: u32) -> KeyPool {
    KeyPool::new(
        vec!["AIzaSyFIRST".to_string(), "AIzaSySECOND".to_string()],
        HashMap::new(),
        quota,
    )
}

#[tokio::test]
async fn test_full_run_writes_units_snapshots_and_inventory() {
    let _ = tracing_subscriber::fmt::try_init();
    let dir = tempfile::tempdir().unwrap();
    write_books(
        dir.path(),
        &[
            ("chemistry_chapters", &["ch1_atoms", "ch2_bonds"]),
            ("physics_chapters", &["ch1_motion"]),
            ("notes", &["ignored"]),
        ],
    );

    let config = Config {
        target_per_unit: 6,
        ..test_config(dir.path())
    };
    let backend = Arc::new(ScriptedBackend::new().with_replies(vec![
        Ok(sample_reply(5, 0)),
        Ok(sample_reply(1, 5)),
        Ok(sample_reply(5, 0)),
        Ok(sample_reply(1, 5)),
        Ok(sample_reply(5, 0)),
        Ok(sample_reply(1, 5)),
    ]));

    let app = App::with_backend(config.clone(), backend.clone(), two_keys(1000));
    let summary = assert_ok!(app.run().await);

    assert!(!summary.pool_exhausted);
    assert_eq!(summary.stats.total, 3);
    assert_eq!(summary.stats.completed, 3);
    assert_eq!(summary.stats.items, 18);

    // 每个章节一个文件，编号从 1 开始连续
    let unit_file = config
        .output_dir
        .join("chemistry_chapters/ch2_bonds_mcqs.json");
    let items: Vec<Mcq> =
        serde_json::from_str(&std::fs::read_to_string(&unit_file).unwrap()).unwrap();
    assert_eq!(items.len(), 6);
    assert_eq!(items[0].id, "chemistry_chapters_ch2_bonds_mcq_001");
    assert_eq!(items[5].id, "chemistry_chapters_ch2_bonds_mcq_006");
    assert!(items.iter().all(|m| m.provenance.ai_generated));

    // 科目合集
    let combined: serde_json::Value = serde_json::from_str(
        &std::fs::read_to_string(
            config
                .output_dir
                .join("chemistry_chapters/chemistry_chapters_all_mcqs.json"),
        )
        .unwrap(),
    )
    .unwrap();
    assert_eq!(combined["total_mcqs"], 12);
    assert_eq!(combined["chapters_included"], 2);

    // 库存报告
    assert_eq!(summary.inventory.grand_total(), 18);
    assert_eq!(summary.inventory.deficits().count(), 2);

    // 远程文件全部释放，中间目录没有残留
    assert_eq!(backend.upload_count(), 3);
    assert_eq!(backend.deleted().len(), 3);
}

#[tokio::test]
async fn test_subject_target_skips_remaining_units() {
    let dir = tempfile::tempdir().unwrap();
    write_books(dir.path(), &[("biology_chapters", &["ch1", "ch2", "ch3"])]);

    let config = Config {
        target_per_unit: 5,
        subject_target: 5,
        ..test_config(dir.path())
    };
    let backend = Arc::new(ScriptedBackend::new().with_replies(vec![Ok(sample_reply(5, 0))]));

    let app = App::with_backend(config.clone(), backend.clone(), two_keys(1000));
    let summary = assert_ok!(app.run().await);

    assert_eq!(summary.stats.completed, 1);
    assert_eq!(summary.stats.skipped, 2);
    assert_eq!(backend.instructions().len(), 1);
    assert!(!config.output_dir.join("biology_chapters/ch2_mcqs.json").exists());
}

#[tokio::test]
async fn test_exhausted_pool_stops_scheduling() {
    let dir = tempfile::tempdir().unwrap();
    write_books(dir.path(), &[("history_chapters", &["ch1", "ch2", "ch3"])]);

    let config = Config {
        target_per_unit: 5,
        ..test_config(dir.path())
    };
    let backend = Arc::new(ScriptedBackend::new().with_replies(vec![
        Ok(sample_reply(5, 0)),
        Ok(sample_reply(5, 0)),
        Ok(sample_reply(5, 0)),
    ]));

    // 每个密钥只能调用一次
    let app = App::with_backend(config.clone(), backend.clone(), two_keys(1));
    let summary = assert_ok!(app.run().await);

    assert!(summary.pool_exhausted);
    assert_eq!(summary.stats.completed, 2);
    assert_eq!(summary.stats.skipped, 1);
    // 已完成的章节照常写出
    assert!(config.output_dir.join("history_chapters/ch1_mcqs.json").exists());
    assert!(config.output_dir.join("history_chapters/ch2_mcqs.json").exists());
    assert!(!config.output_dir.join("history_chapters/ch3_mcqs.json").exists());
}

#[tokio::test]
#[ignore] // 默认忽略，需要真实密钥和教材目录：cargo test -- --ignored
async fn test_live_run() {
    // 加载配置
    let config = Config::from_env();

    // 初始化日志
    logger::init(config.verbose_logging);

    let app = App::initialize(config).await.expect("初始化失败");
    let summary = app.run().await.expect("运行失败");

    println!("本次生成 {} 道题", summary.stats.items);
    println!("题库合计 {} 道题", summary.inventory.grand_total());
}
