//! Integration tests for image-moderator
//!
//! These tests drive the executor with an in-process classifier, so no
//! network access is required.

use image_moderator::classifier::{Classifier, ImagePayload};
use image_moderator::discovery::{discover_images, DiscoveryOptions};
use image_moderator::error::{ClassifyError, ClassifyResult, DiscoveryError};
use image_moderator::executor::BatchExecutor;
use image_moderator::model::{Violation, WorkItem};
use image_moderator::sink::ResultSink;
use image_moderator::ModeratorError;
use parking_lot::Mutex;
use std::collections::HashMap;
use std::fs;
use std::io::{self, Write};
use std::path::Path;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tempfile::tempdir;

/// Classifier scripted by file content:
/// - `fail...` returns an error
/// - `clean...` returns only zero scores
/// - `slow...` sleeps for a long time
/// - `panic...` panics inside the worker task
/// - anything else returns three flagged violations and one clean one
#[derive(Default)]
struct ScriptedClassifier {
    delay: Duration,
    in_flight: AtomicUsize,
    max_in_flight: AtomicUsize,
    calls: Mutex<HashMap<String, usize>>,
}

impl ScriptedClassifier {
    fn with_delay(delay: Duration) -> Self {
        Self {
            delay,
            ..Default::default()
        }
    }

    fn total_calls(&self) -> usize {
        self.calls.lock().values().sum()
    }
}

#[async_trait::async_trait]
impl Classifier for ScriptedClassifier {
    async fn classify(&self, image: &ImagePayload) -> ClassifyResult<Vec<Violation>> {
        let key = String::from_utf8_lossy(&image.bytes).into_owned();
        *self.calls.lock().entry(key.clone()).or_default() += 1;
        if key.starts_with("panic") {
            panic!("classifier crashed on {key}");
        }

        let now = self.in_flight.fetch_add(1, Ordering::SeqCst) + 1;
        self.max_in_flight.fetch_max(now, Ordering::SeqCst);

        let delay = if key.starts_with("slow") {
            Duration::from_secs(60)
        } else {
            self.delay
        };
        tokio::time::sleep(delay).await;
        self.in_flight.fetch_sub(1, Ordering::SeqCst);

        if key.starts_with("fail") {
            return Err(ClassifyError::Status {
                status: 500,
                body: "internal".into(),
            });
        }
        if key.starts_with("clean") {
            return Ok(vec![
                Violation::new("Sexuality and Nudity", 0.0, "none"),
                Violation::new("Graphic and Disturbing Content", 0.0, "none"),
            ]);
        }
        Ok(vec![
            Violation::new("Sexuality and Nudity", 0.35, "swimsuit"),
            Violation::new("Religious and Political Content", 0.0, "none"),
            Violation::new("Illegal Activities and Regulated Goods", 0.12, "prop knife"),
            Violation::new("Graphic and Disturbing Content", 0.8, "blood"),
        ])
    }
}

/// Writer that rejects every second write
#[derive(Default)]
struct FlakyWriter {
    writes: usize,
    data: Vec<u8>,
}

impl Write for FlakyWriter {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        self.writes += 1;
        if self.writes % 2 == 0 {
            return Err(io::Error::new(io::ErrorKind::Other, "disk full"));
        }
        self.data.extend_from_slice(buf);
        Ok(buf.len())
    }

    fn flush(&mut self) -> io::Result<()> {
        Ok(())
    }
}

fn write_image(root: &Path, rel: &str, content: &str) {
    let path = root.join(rel);
    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent).unwrap();
    }
    fs::write(path, content).unwrap();
}

fn executor(
    classifier: Arc<ScriptedClassifier>,
    concurrency: usize,
) -> (BatchExecutor<ScriptedClassifier, Vec<u8>>, Arc<ResultSink<Vec<u8>>>) {
    let sink = Arc::new(ResultSink::from_writer(Vec::new()));
    let exec = BatchExecutor::new(classifier, Arc::clone(&sink), concurrency)
        .with_progress_interval(None);
    (exec, sink)
}

fn output_lines(
    exec: BatchExecutor<ScriptedClassifier, Vec<u8>>,
    sink: Arc<ResultSink<Vec<u8>>>,
) -> Vec<String> {
    // The executor holds the other reference to the sink
    drop(exec);
    let sink = Arc::try_unwrap(sink).ok().expect("sink still shared");
    String::from_utf8(sink.into_inner())
        .unwrap()
        .lines()
        .map(str::to_string)
        .collect()
}

#[test]
fn test_discovery_filters_extensions() {
    let dir = tempdir().unwrap();
    write_image(dir.path(), "a.jpg", "a");
    write_image(dir.path(), "b.png", "b");
    write_image(dir.path(), "c.txt", "c");
    write_image(dir.path(), "sub/d.gif", "d");
    write_image(dir.path(), "E.JPG", "e");

    let items = discover_images(dir.path(), &DiscoveryOptions::default()).unwrap();
    let mut names: Vec<String> = items
        .iter()
        .map(|i| {
            i.path()
                .strip_prefix(dir.path())
                .unwrap()
                .to_string_lossy()
                .replace('\\', "/")
        })
        .collect();
    names.sort();

    assert_eq!(names, vec!["E.JPG", "a.jpg", "b.png", "sub/d.gif"]);
}

#[test]
fn test_discovery_missing_root_fails() {
    let dir = tempdir().unwrap();
    let err = discover_images(&dir.path().join("missing"), &DiscoveryOptions::default())
        .unwrap_err();
    assert!(matches!(err, DiscoveryError::RootUnreadable { .. }));
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_each_item_classified_exactly_once_within_limit() {
    let dir = tempdir().unwrap();
    for i in 0..20 {
        write_image(dir.path(), &format!("img{i:02}.png"), &format!("img{i:02}"));
    }

    let classifier = Arc::new(ScriptedClassifier::with_delay(Duration::from_millis(20)));
    let (exec, sink) = executor(Arc::clone(&classifier), 3);

    let result = exec
        .discover_and_run(dir.path(), &DiscoveryOptions::default())
        .await
        .unwrap();

    assert_eq!(result.summary.total, 20);
    assert_eq!(result.summary.processed, 20);
    assert_eq!(result.summary.errors, 0);
    assert!(result.completed);

    assert_eq!(classifier.total_calls(), 20);
    assert!(classifier.calls.lock().values().all(|&n| n == 1));
    let max = classifier.max_in_flight.load(Ordering::SeqCst);
    assert!(max <= 3, "saw {max} concurrent calls");
    assert!(max >= 2, "expected overlap, saw {max}");

    // Three flagged violations per image
    assert_eq!(output_lines(exec, sink).len(), 60);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_concurrency_one_is_sequential() {
    let dir = tempdir().unwrap();
    for i in 0..6 {
        write_image(dir.path(), &format!("{i}.jpg"), &format!("seq{i}"));
    }

    let classifier = Arc::new(ScriptedClassifier::with_delay(Duration::from_millis(5)));
    let (exec, _sink) = executor(Arc::clone(&classifier), 1);
    let result = exec
        .discover_and_run(dir.path(), &DiscoveryOptions::default())
        .await
        .unwrap();

    assert_eq!(result.summary.processed, 6);
    assert_eq!(classifier.max_in_flight.load(Ordering::SeqCst), 1);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_one_failure_of_five() {
    let dir = tempdir().unwrap();
    write_image(dir.path(), "1.jpg", "ok1");
    write_image(dir.path(), "2.jpg", "ok2");
    write_image(dir.path(), "3.jpg", "fail3");
    write_image(dir.path(), "4.jpg", "ok4");
    write_image(dir.path(), "5.jpg", "ok5");

    let classifier = Arc::new(ScriptedClassifier::default());
    let (exec, sink) = executor(Arc::clone(&classifier), 2);
    let result = exec
        .discover_and_run(dir.path(), &DiscoveryOptions::default())
        .await
        .unwrap();

    assert_eq!(result.summary.to_string(), "total=5 processed=5 errors=1");
    assert_eq!(result.summary.succeeded() + result.summary.errors, 5);
    assert_eq!(result.failed, vec![dir.path().join("3.jpg")]);

    let lines = output_lines(exec, sink);
    let mut images: Vec<&str> = lines.iter().map(|l| l.split('|').next().unwrap()).collect();
    images.dedup();
    images.sort();
    assert_eq!(images, vec!["1.jpg", "2.jpg", "4.jpg", "5.jpg"]);
    assert_eq!(lines.len(), 12);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_clean_image_writes_nothing_but_counts() {
    let dir = tempdir().unwrap();
    write_image(dir.path(), "clean.png", "clean");

    let classifier = Arc::new(ScriptedClassifier::default());
    let (exec, sink) = executor(classifier, 4);
    let result = exec
        .discover_and_run(dir.path(), &DiscoveryOptions::default())
        .await
        .unwrap();

    assert_eq!(result.summary.processed, 1);
    assert_eq!(result.summary.errors, 0);
    assert_eq!(result.snapshot.records, 0);
    assert!(output_lines(exec, sink).is_empty());
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_empty_directory() {
    let dir = tempdir().unwrap();

    let classifier = Arc::new(ScriptedClassifier::default());
    let (exec, sink) = executor(Arc::clone(&classifier), 4);
    let result = exec
        .discover_and_run(dir.path(), &DiscoveryOptions::default())
        .await
        .unwrap();

    assert_eq!(result.summary.to_string(), "total=0 processed=0 errors=0");
    assert!(result.completed);
    assert_eq!(classifier.total_calls(), 0);
    assert_eq!(sink.stats().bursts_written(), 0);
    assert!(output_lines(exec, sink).is_empty());
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_missing_root_is_fatal() {
    let dir = tempdir().unwrap();
    let classifier = Arc::new(ScriptedClassifier::default());
    let (exec, _sink) = executor(Arc::clone(&classifier), 4);

    let err = exec
        .discover_and_run(&dir.path().join("nope"), &DiscoveryOptions::default())
        .await
        .unwrap_err();
    assert!(matches!(err, ModeratorError::Discovery(_)));
    assert_eq!(classifier.total_calls(), 0);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_bursts_are_contiguous() {
    let dir = tempdir().unwrap();
    for i in 0..40 {
        write_image(dir.path(), &format!("p{i:02}.webp"), &format!("p{i:02}"));
    }

    let classifier = Arc::new(ScriptedClassifier::with_delay(Duration::from_millis(1)));
    let (exec, sink) = executor(classifier, 16);
    let result = exec
        .discover_and_run(dir.path(), &DiscoveryOptions::default())
        .await
        .unwrap();
    assert_eq!(result.summary.errors, 0);

    let lines = output_lines(exec, sink);
    assert_eq!(lines.len(), 120);
    for burst in lines.chunks(3) {
        let image = burst[0].split('|').next().unwrap();
        assert!(
            burst.iter().all(|l| l.split('|').next() == Some(image)),
            "interleaved burst: {burst:?}"
        );
    }
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn test_timeout_counts_as_error() {
    let dir = tempdir().unwrap();
    write_image(dir.path(), "a.jpg", "slow-a");
    write_image(dir.path(), "b.jpg", "ok-b");

    let classifier = Arc::new(ScriptedClassifier::default());
    let (exec, sink) = executor(Arc::clone(&classifier), 2);
    let exec = exec.with_timeout(Some(Duration::from_millis(100)));

    let result = exec
        .discover_and_run(dir.path(), &DiscoveryOptions::default())
        .await
        .unwrap();

    assert_eq!(result.summary.to_string(), "total=2 processed=2 errors=1");
    assert_eq!(result.failed, vec![dir.path().join("a.jpg")]);
    assert_eq!(classifier.total_calls(), 2);
    assert_eq!(output_lines(exec, sink).len(), 3);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn test_unreadable_image_is_isolated() {
    let dir = tempdir().unwrap();
    write_image(dir.path(), "ok.png", "ok");

    let items = vec![
        WorkItem::new(dir.path().join("ok.png")),
        WorkItem::new(dir.path().join("vanished.png")),
    ];

    let classifier = Arc::new(ScriptedClassifier::default());
    let (exec, _sink) = executor(Arc::clone(&classifier), 2);
    let result = exec.run(items).await.unwrap();

    assert_eq!(result.summary.to_string(), "total=2 processed=2 errors=1");
    assert_eq!(classifier.total_calls(), 1);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn test_shutdown_before_dispatch() {
    let dir = tempdir().unwrap();
    for i in 0..5 {
        write_image(dir.path(), &format!("{i}.gif"), &format!("s{i}"));
    }

    let classifier = Arc::new(ScriptedClassifier::default());
    let (exec, _sink) = executor(Arc::clone(&classifier), 2);
    exec.shutdown_flag().store(true, Ordering::SeqCst);

    let result = exec
        .discover_and_run(dir.path(), &DiscoveryOptions::default())
        .await
        .unwrap();

    assert!(!result.completed);
    assert_eq!(result.dispatched, 0);
    assert_eq!(result.summary.total, 5);
    assert_eq!(result.summary.processed, 0);
    assert_eq!(classifier.total_calls(), 0);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn test_file_sink_appends_across_runs() {
    let dir = tempdir().unwrap();
    let images = dir.path().join("images");
    write_image(&images, "x.png", "x");
    let output = dir.path().join("result.csv");

    for _ in 0..2 {
        let sink = Arc::new(ResultSink::open(&output).unwrap());
        let exec = BatchExecutor::new(Arc::new(ScriptedClassifier::default()), sink, 1)
            .with_progress_interval(None);
        exec.discover_and_run(&images, &DiscoveryOptions::default())
            .await
            .unwrap();
    }

    let content = fs::read_to_string(&output).unwrap();
    let lines: Vec<&str> = content.lines().collect();
    assert_eq!(lines.len(), 6);
    assert_eq!(lines[0], "x.png|Sexuality and Nudity|0.35|swimsuit");
    assert_eq!(lines[3], lines[0]);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn test_sink_write_failure_is_isolated() {
    let dir = tempdir().unwrap();
    for i in 1..=4 {
        write_image(dir.path(), &format!("{i}.jpg"), &format!("ok{i}"));
    }

    let sink = Arc::new(ResultSink::from_writer(FlakyWriter::default()));
    let exec = BatchExecutor::new(Arc::new(ScriptedClassifier::default()), Arc::clone(&sink), 1)
        .with_progress_interval(None);
    let result = exec
        .discover_and_run(dir.path(), &DiscoveryOptions::default())
        .await
        .unwrap();

    // Sequential dispatch, so the 2nd and 4th bursts hit the failing writes
    assert_eq!(result.summary.to_string(), "total=4 processed=4 errors=2");
    let mut failed = result.failed.clone();
    failed.sort();
    assert_eq!(failed, vec![dir.path().join("2.jpg"), dir.path().join("4.jpg")]);
    assert_eq!(sink.stats().write_failures(), 2);
    assert_eq!(sink.stats().records_written(), 6);

    drop(exec);
    let sink = Arc::try_unwrap(sink).ok().expect("sink still shared");
    let content = String::from_utf8(sink.into_inner().data).unwrap();
    let lines: Vec<&str> = content.lines().collect();
    assert_eq!(lines.len(), 6);
    assert!(lines[..3].iter().all(|l| l.starts_with("1.jpg|")));
    assert!(lines[3..].iter().all(|l| l.starts_with("3.jpg|")));
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn test_panicking_worker_is_isolated() {
    let dir = tempdir().unwrap();
    write_image(dir.path(), "1.jpg", "ok1");
    write_image(dir.path(), "2.jpg", "ok2");
    write_image(dir.path(), "3.jpg", "panic3");
    write_image(dir.path(), "4.jpg", "ok4");
    write_image(dir.path(), "5.jpg", "ok5");

    let classifier = Arc::new(ScriptedClassifier::default());
    let (exec, sink) = executor(Arc::clone(&classifier), 2);
    let result = exec
        .discover_and_run(dir.path(), &DiscoveryOptions::default())
        .await
        .unwrap();

    assert_eq!(result.summary.to_string(), "total=5 processed=5 errors=1");
    assert_eq!(result.dispatched, 5);
    assert!(result.completed);
    // The task died before reporting its path
    assert!(result.failed.is_empty());
    assert_eq!(classifier.total_calls(), 5);

    let lines = output_lines(exec, sink);
    assert_eq!(lines.len(), 12);
    assert!(!lines.iter().any(|l| l.starts_with("3.jpg|")));
}
