use std::fs;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::{Duration, SystemTime};

use docenrich_bundle::{BundleBuilder, BundleError, BundleManifest, ComponentId, DirPackageStore};
use docenrich_converter::*;
use docenrich_engine::{
    AnalysisEngine, EngineFactory, RuleEngineFactory, TuningParameters,
};
use docenrich_model::{AnnotationGraph, TypeSystem};
use pretty_assertions::assert_eq;
use tempfile::TempDir;

const PEOPLE_ENGINE: &str = r#"
[engine]
name = "people"

[[types]]
name = "org.example.PersonType"
features = [
  { name = "confidence", range = "string" },
  { name = "ruleId", range = "string" },
]

[[rules]]
type = "org.example.PersonType"
dictionary = "../resources/names.txt"
features = { confidence = "0.9", ruleId = "names" }
"#;

const INPUT: &str =
    r#"<vce><document url="a"><content name="body">Hello Alice.</content></document></vce>"#;

/// A support root with `repo/people.pear` and an empty `run/`.
fn support_root() -> TempDir {
    let root = tempfile::tempdir().unwrap();
    fs::create_dir_all(root.path().join("repo")).unwrap();
    fs::create_dir_all(root.path().join("run")).unwrap();
    write_bundle(root.path(), "people.pear");
    root
}

fn write_bundle(root: &Path, file_name: &str) -> PathBuf {
    let manifest = BundleManifest::new("People", "1.0.0")
        .with_component_id(ComponentId::new("org.example.people").unwrap());
    let bytes = BundleBuilder::new(manifest)
        .descriptor(PEOPLE_ENGINE.as_bytes().to_vec())
        .file("resources/names.txt", b"Alice\nBob\n".to_vec())
        .build()
        .unwrap();
    let path = root.join("repo").join(file_name);
    fs::write(&path, bytes).unwrap();
    path
}

fn options(root: &Path, types: &[&str]) -> FlatOptions {
    let mut opts = FlatOptions::new()
        .with(OPTION_SUPPORT_ROOT, root.display().to_string())
        .with(OPTION_PEAR_FILENAME, "people.pear");
    for t in types {
        opts.push(OPTION_CONTENT_TYPES, *t);
    }
    opts
}

fn converter(source: &FlatOptions) -> EnrichingConverter {
    let options = ConverterOptions::from_source(source).unwrap();
    EnrichingConverter::new(&options, &RuleEngineFactory).unwrap()
}

fn convert(converter: &mut EnrichingConverter, input: &str) -> String {
    let out = converter.convert(Some(input.as_bytes())).unwrap().unwrap();
    String::from_utf8(out).unwrap()
}

// ── provisioning ────────────────────────────────────────────────

#[test]
fn first_use_installs_declared_component() {
    let root = support_root();
    let converter = converter(&options(root.path(), &[]));

    let installed = root.path().join("run/org.example.people");
    assert!(installed.is_dir());
    assert_eq!(converter.component().component_id.as_str(), "org.example.people");
    assert_eq!(converter.component().root, installed);
    assert!(converter.is_alive());
}

#[test]
fn unchanged_bundle_is_reused() {
    let root = support_root();
    let layout = SupportLayout::new(root.path());
    let provisioner = EngineProvisioner::new(DirPackageStore::new(&layout.install_dir));
    let tuning = TuningParameters::default();

    let first = provisioner
        .provision(&layout, "people.pear", &RuleEngineFactory, &tuning)
        .unwrap();
    assert_eq!(first.outcome, InstallOutcome::Installed);
    let receipt = first.component.root.join(docenrich_bundle::RECEIPT_FILE);
    let written = fs::metadata(&receipt).unwrap().modified().unwrap();

    let second = provisioner
        .provision(&layout, "people.pear", &RuleEngineFactory, &tuning)
        .unwrap();
    assert_eq!(second.outcome, InstallOutcome::Reused);
    assert_eq!(second.component.component_id, first.component.component_id);
    assert_eq!(fs::metadata(&receipt).unwrap().modified().unwrap(), written);
}

#[test]
fn newer_bundle_is_reinstalled() {
    let root = support_root();
    let layout = SupportLayout::new(root.path());
    let provisioner = EngineProvisioner::new(DirPackageStore::new(&layout.install_dir));
    let tuning = TuningParameters::default();
    provisioner
        .provision(&layout, "people.pear", &RuleEngineFactory, &tuning)
        .unwrap();

    let stale = layout.install_dir.join("org.example.people/stale.txt");
    fs::write(&stale, b"left over").unwrap();
    fs::File::options()
        .write(true)
        .open(layout.repo_dir.join("people.pear"))
        .unwrap()
        .set_modified(SystemTime::now() + Duration::from_secs(3600))
        .unwrap();

    let again = provisioner
        .provision(&layout, "people.pear", &RuleEngineFactory, &tuning)
        .unwrap();
    assert_eq!(again.outcome, InstallOutcome::Updated);
    assert!(!stale.exists());
    assert!(again.component.resource_specifier.is_file());
}

#[test]
fn missing_bundle_is_fatal() {
    let root = support_root();
    let source = options(root.path(), &[]).with(OPTION_PEAR_FILENAME, "nope.pear");
    let options = ConverterOptions::from_source(&source).unwrap();
    let err = EnrichingConverter::new(&options, &RuleEngineFactory)
        .err()
        .unwrap();
    assert!(err.is_fatal());
    assert!(matches!(
        err,
        ConverterError::Fatal(FatalError::Provision(ProvisionError::MissingBundle(_)))
    ));
}

#[test]
fn missing_run_directory_is_fatal() {
    let root = support_root();
    fs::remove_dir(root.path().join("run")).unwrap();
    let options = ConverterOptions::from_source(&options(root.path(), &[])).unwrap();
    let err = EnrichingConverter::new(&options, &RuleEngineFactory)
        .err()
        .unwrap();
    assert!(matches!(
        err,
        ConverterError::Fatal(FatalError::Provision(ProvisionError::MissingDirectory { .. }))
    ));
}

#[test]
fn broken_engine_specifier_is_fatal() {
    let root = support_root();
    let manifest = BundleManifest::new("Broken", "1")
        .with_component_id(ComponentId::new("org.example.broken").unwrap());
    let bytes = BundleBuilder::new(manifest)
        .descriptor(b"[[rules]]\ntype = \"org.example.Nope\"\npattern = \"x\"\n".to_vec())
        .build()
        .unwrap();
    fs::write(root.path().join("repo/broken.pear"), bytes).unwrap();

    let source = options(root.path(), &[]).with(OPTION_PEAR_FILENAME, "broken.pear");
    let options = ConverterOptions::from_source(&source).unwrap();
    let err = EnrichingConverter::new(&options, &RuleEngineFactory)
        .err()
        .unwrap();
    assert!(matches!(
        err,
        ConverterError::Fatal(FatalError::Provision(ProvisionError::Engine(_)))
    ));
}

fn set_bundle_modified(root: &Path, file_name: &str, offset: Duration) {
    fs::File::options()
        .write(true)
        .open(root.join("repo").join(file_name))
        .unwrap()
        .set_modified(SystemTime::now() + offset)
        .unwrap();
}

fn provision_error(source: &FlatOptions) -> ProvisionError {
    let options = ConverterOptions::from_source(source).unwrap();
    match EnrichingConverter::new(&options, &RuleEngineFactory).err().unwrap() {
        ConverterError::Fatal(FatalError::Provision(e)) => e,
        other => panic!("expected a fatal provisioning error, got {other}"),
    }
}

#[test]
fn corrupt_bundle_is_fatal() {
    let root = support_root();
    fs::write(root.path().join("repo/people.pear"), b"not a zip archive").unwrap();
    assert!(matches!(
        provision_error(&options(root.path(), &[])),
        ProvisionError::Bundle(BundleError::Zip(_))
    ));
}

#[test]
fn bundle_without_manifest_is_fatal() {
    use std::io::Write;

    let root = support_root();
    let mut zip = zip::ZipWriter::new(std::io::Cursor::new(Vec::new()));
    zip.start_file("desc/engine.toml", zip::write::SimpleFileOptions::default())
        .unwrap();
    zip.write_all(PEOPLE_ENGINE.as_bytes()).unwrap();
    let bytes = zip.finish().unwrap().into_inner();
    fs::write(root.path().join("repo/people.pear"), bytes).unwrap();

    assert!(matches!(
        provision_error(&options(root.path(), &[])),
        ProvisionError::Bundle(BundleError::MissingEntry(_))
    ));
}

#[test]
fn read_only_run_directory_is_fatal() {
    let root = support_root();
    let run = root.path().join("run");
    let mut permissions = fs::metadata(&run).unwrap().permissions();
    permissions.set_readonly(true);
    fs::set_permissions(&run, permissions.clone()).unwrap();

    let err = provision_error(&options(root.path(), &[]));

    permissions.set_readonly(false);
    fs::set_permissions(&run, permissions).unwrap();
    assert!(matches!(err, ProvisionError::NotWritable(_)));
}

#[test]
fn failed_update_recovers_with_next_good_bundle() {
    let root = support_root();
    converter(&options(root.path(), &[]));

    let manifest = BundleManifest::new("People", "1.0.1")
        .with_component_id(ComponentId::new("org.example.people").unwrap());
    let bytes = BundleBuilder::new(manifest)
        .descriptor(PEOPLE_ENGINE.as_bytes().to_vec())
        .file("../oops.txt", b"outside".to_vec())
        .build()
        .unwrap();
    fs::write(root.path().join("repo/people.pear"), bytes).unwrap();
    set_bundle_modified(root.path(), "people.pear", Duration::from_secs(3600));
    assert!(matches!(
        provision_error(&options(root.path(), &[])),
        ProvisionError::Bundle(BundleError::UnsafeEntryPath(_))
    ));
    assert!(!root.path().join("oops.txt").exists());

    write_bundle(root.path(), "people.pear");
    set_bundle_modified(root.path(), "people.pear", Duration::from_secs(7200));
    let mut converter = converter(&options(root.path(), &["Person.org.example.PersonType"]));
    assert!(converter.component().resource_specifier.is_file());
    assert!(convert(&mut converter, INPUT).contains(r#"name="Person""#));

    let leftovers: Vec<_> = fs::read_dir(root.path().join("run"))
        .unwrap()
        .map(|entry| entry.unwrap().file_name().into_string().unwrap())
        .collect();
    assert_eq!(leftovers, vec!["org.example.people".to_string()]);
}

#[cfg(target_os = "linux")]
#[test]
fn lock_left_by_dead_process_is_reclaimed() {
    let root = support_root();
    let lock = root.path().join("run/org.example.people.lock");
    fs::write(&lock, "4294967295\n").unwrap();

    let source = options(root.path(), &[]).with(OPTION_INSTALL_LOCK_TIMEOUT_MS, "500");
    let converter = converter(&source);
    assert_eq!(converter.component().component_id.as_str(), "org.example.people");
    assert!(!lock.exists());
}

#[test]
fn malformed_type_option_is_fatal() {
    let root = support_root();
    let options = ConverterOptions::from_source(&options(root.path(), &["Person"])).unwrap();
    let err = EnrichingConverter::new(&options, &RuleEngineFactory)
        .err()
        .unwrap();
    assert!(matches!(err, ConverterError::Fatal(FatalError::Options(_))));
}

// ── enrichment ──────────────────────────────────────────────────

#[test]
fn whole_annotation_projection() {
    let root = support_root();
    let mut converter = converter(&options(root.path(), &["Person.org.example.PersonType"]));
    let out = convert(&mut converter, INPUT);
    assert_eq!(
        out,
        concat!(
            r#"<?xml version="1.0" encoding="UTF-8"?>"#,
            r#"<vce><document url="a"><content name="body">Hello Alice.</content>"#,
            r#"<content name="Person" confidence="0.9">Alice</content>"#,
            r#"</document></vce>"#,
        )
    );
}

#[test]
fn single_feature_projection() {
    let root = support_root();
    let mut converter = converter(&options(
        root.path(),
        &["Person.org.example.PersonType.confidence"],
    ));
    let out = convert(&mut converter, INPUT);
    assert!(out.contains(r#"<content name="Person" coveredtext="Alice">0.9</content>"#));
}

#[test]
fn offsets_when_enabled() {
    let root = support_root();
    let source = options(
        root.path(),
        &["Person.org.example.PersonType", "Name:org.example.PersonType:confidence"],
    )
    .with(OPTION_ANNOTATION_OFFSETS, OPTION_ANNOTATION_OFFSETS);
    let mut converter = converter(&source);
    let out = convert(&mut converter, INPUT);
    assert!(out.contains(
        r#"<content name="Person" begin="6" end="11" confidence="0.9">Alice</content>"#
    ));
    assert!(out.contains(
        r#"<content name="Name" coveredtext="Alice" begin="6" end="11">0.9</content>"#
    ));
}

#[test]
fn unknown_type_appends_nothing() {
    let root = support_root();
    let mut converter = converter(&options(root.path(), &["Thing.org.example.Unknown"]));
    let out = convert(&mut converter, INPUT);
    assert_eq!(out.matches("<content").count(), 1);
}

#[test]
fn empty_filtered_document_is_skipped() {
    let root = support_root();
    let source = options(root.path(), &["Person.org.example.PersonType"])
        .with(OPTION_EXCLUDE_BY_DEFAULT, OPTION_EXCLUDE_BY_DEFAULT)
        .with(OPTION_CONTENT_LIST, "title");
    let mut converter = converter(&source);
    let out = convert(&mut converter, INPUT);
    assert_eq!(out.matches("<content").count(), 1);
}

#[test]
fn every_document_is_enriched() {
    let root = support_root();
    let mut converter = converter(&options(root.path(), &["Person.org.example.PersonType"]));
    let input = concat!(
        "<vce>",
        r#"<document><content name="body">Alice and Bob</content></document>"#,
        r#"<document><content name="body">nobody</content></document>"#,
        r#"<document><content name="body">Bob</content></document>"#,
        "</vce>",
    );
    let mut xml = XmlDocument::parse(convert(&mut converter, input).as_bytes()).unwrap();
    let people: Vec<Vec<String>> = xml
        .documents_mut()
        .into_iter()
        .map(|doc| {
            doc.child_elements()
                .filter(|c| c.attribute(NAME_ATTRIBUTE) == Some("Person"))
                .map(|c| c.text())
                .collect()
        })
        .collect();
    assert_eq!(
        people,
        vec![vec!["Alice".to_string(), "Bob".to_string()], vec![], vec!["Bob".to_string()]]
    );
}

// ── lifecycle ───────────────────────────────────────────────────

#[test]
fn null_input_gives_null_output() {
    let root = support_root();
    let mut converter = converter(&options(root.path(), &[]));
    assert_eq!(converter.convert(None).unwrap(), None);
}

#[test]
fn bad_input_fails_only_that_call() {
    let root = support_root();
    let mut converter = converter(&options(root.path(), &["Person.org.example.PersonType"]));
    let err = converter.convert(Some(b"<vce><document>")).unwrap_err();
    assert!(matches!(err, ConverterError::Conversion { .. }));
    assert!(!err.is_fatal());
    assert!(converter.is_alive());
    assert!(convert(&mut converter, INPUT).contains(r#"name="Person""#));
}

#[test]
fn terminated_converter_refuses_work() {
    let root = support_root();
    let mut converter = converter(&options(root.path(), &[]));
    converter.terminate().unwrap();
    assert!(!converter.is_alive());
    assert!(matches!(
        converter.convert(Some(INPUT.as_bytes())),
        Err(ConverterError::Terminated)
    ));
    assert!(matches!(converter.convert(None), Err(ConverterError::Terminated)));
    assert!(matches!(converter.terminate(), Err(ConverterError::Terminated)));
}

// ── engine behaviour seen through the converter ─────────────────

/// Counts `process` calls and panics on demand.
struct CountingEngine {
    type_system: Arc<TypeSystem>,
    calls: Arc<AtomicUsize>,
    panic: bool,
}

impl AnalysisEngine for CountingEngine {
    fn type_system(&self) -> Arc<TypeSystem> {
        Arc::clone(&self.type_system)
    }

    fn new_graph(&self) -> docenrich_engine::Result<AnnotationGraph> {
        Ok(AnnotationGraph::new(Arc::clone(&self.type_system)))
    }

    fn process(&self, _graph: &mut AnnotationGraph) -> docenrich_engine::Result<()> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        if self.panic {
            panic!("engine exploded");
        }
        Ok(())
    }
}

struct CountingFactory {
    calls: Arc<AtomicUsize>,
    panic: bool,
}

impl EngineFactory for CountingFactory {
    fn create_engine(
        &self,
        resource_specifier: &Path,
        _tuning: &TuningParameters,
    ) -> docenrich_engine::Result<Box<dyn AnalysisEngine>> {
        assert!(resource_specifier.is_file());
        Ok(Box::new(CountingEngine {
            type_system: Arc::new(TypeSystem::builtin().unwrap()),
            calls: Arc::clone(&self.calls),
            panic: self.panic,
        }))
    }
}

fn counting_converter(source: &FlatOptions, panic: bool) -> (EnrichingConverter, Arc<AtomicUsize>) {
    let calls = Arc::new(AtomicUsize::new(0));
    let factory = CountingFactory {
        calls: Arc::clone(&calls),
        panic,
    };
    let options = ConverterOptions::from_source(source).unwrap();
    (EnrichingConverter::new(&options, &factory).unwrap(), calls)
}

#[test]
fn empty_document_never_reaches_engine() {
    let root = support_root();
    let source = options(root.path(), &["Sentence.uima.tt.SentenceAnnotation"])
        .with(OPTION_EXCLUDE_BY_DEFAULT, "true");
    let (mut converter, calls) = counting_converter(&source, false);
    convert(&mut converter, INPUT);
    assert_eq!(calls.load(Ordering::SeqCst), 0);

    let source = options(root.path(), &["Sentence.uima.tt.SentenceAnnotation"]);
    let (mut converter, calls) = counting_converter(&source, false);
    convert(&mut converter, INPUT);
    assert_eq!(calls.load(Ordering::SeqCst), 1);
}

#[test]
fn engine_is_idle_without_content_types() {
    let root = support_root();
    let (mut converter, calls) = counting_converter(&options(root.path(), &[]), false);
    let out = convert(&mut converter, INPUT);
    assert!(out.contains(r#"<content name="body">Hello Alice.</content>"#));
    assert_eq!(calls.load(Ordering::SeqCst), 0);
}

#[test]
fn engine_panic_is_a_conversion_failure() {
    let root = support_root();
    let source = options(root.path(), &["Sentence.uima.tt.SentenceAnnotation"]);
    let (mut converter, calls) = counting_converter(&source, true);
    let err = converter.convert(Some(INPUT.as_bytes())).unwrap_err();
    match err {
        ConverterError::Conversion { message, .. } => {
            assert!(message.contains("engine exploded"), "{message}")
        }
        other => panic!("unexpected error: {other}"),
    }
    assert_eq!(calls.load(Ordering::SeqCst), 1);
    assert!(converter.is_alive());
}
