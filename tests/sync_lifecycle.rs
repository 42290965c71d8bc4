use std::{
    path::Path,
    time::{Duration, SystemTime},
};

use docsift::{
    Catalog,
    Engine,
    Error,
    Query,
    doc_id::{self, Modality},
    embedding::HashingEmbedder,
    walker::FileFilter,
};

fn open_engine(data: &Path) -> Engine {
    Engine::open(
        &data.join("index.redb"),
        Box::new(HashingEmbedder::new(512).unwrap()),
    )
    .unwrap()
}

fn doc_id_of(engine: &Engine, filename: &str) -> u64 {
    engine
        .documents()
        .unwrap()
        .into_iter()
        .find(|d| d.filename == filename)
        .map(|d| d.doc_id)
        .unwrap_or_else(|| panic!("{filename} is not registered"))
}

fn touch_later(path: &Path, secs: u64) {
    let file = std::fs::File::options().write(true).open(path).unwrap();
    file.set_modified(SystemTime::now() + Duration::from_secs(secs))
        .unwrap();
}

#[test]
fn new_modified_deleted_lifecycle() {
    let data = tempfile::tempdir().unwrap();
    let docs = tempfile::tempdir().unwrap();
    let notes = docs.path().join("notes.txt");
    let recipe = docs.path().join("recipe.md");
    std::fs::write(&notes, "Rust ownership rules. Borrowing is checked.").unwrap();
    std::fs::write(&recipe, "Knead the dough. Let it rise overnight.").unwrap();

    let engine = open_engine(data.path());
    let filter = FileFilter::default();

    let report = engine.sync(docs.path(), &filter).unwrap();
    assert_eq!(report.added, 2);
    assert!(report.failed.is_empty());

    let notes_id = doc_id_of(&engine, "notes.txt");
    let recipe_id = doc_id_of(&engine, "recipe.md");
    assert_ne!(notes_id, recipe_id);

    // Modified: same doc_id, exactly the new segment count.
    std::fs::write(&notes, "One sentence only. Two. Three now.").unwrap();
    touch_later(&notes, 30);
    let report = engine.sync(docs.path(), &filter).unwrap();
    assert_eq!(report.updated, 1);
    assert_eq!(report.unchanged, 1);
    assert_eq!(doc_id_of(&engine, "notes.txt"), notes_id);
    let info = engine
        .documents()
        .unwrap()
        .into_iter()
        .find(|d| d.doc_id == notes_id)
        .unwrap();
    assert_eq!(info.vectors, 3);

    // Deleted: range emptied and registry entry gone.
    std::fs::remove_file(&recipe).unwrap();
    let report = engine.sync(docs.path(), &filter).unwrap();
    assert_eq!(report.deleted, 1);
    let stats = engine.stats().unwrap();
    assert_eq!(stats.documents, 1);
    assert_eq!(stats.vectors, 3);
    assert!(engine.documents().unwrap().iter().all(|d| d.doc_id != recipe_id));

    // A later file never reuses the deleted id.
    std::fs::write(docs.path().join("fresh.txt"), "A brand new file.").unwrap();
    engine.sync(docs.path(), &filter).unwrap();
    let fresh_id = doc_id_of(&engine, "fresh.txt");
    assert!(fresh_id > recipe_id && fresh_id > notes_id);
}

#[test]
fn second_pass_is_a_no_op() {
    let data = tempfile::tempdir().unwrap();
    let docs = tempfile::tempdir().unwrap();
    std::fs::write(docs.path().join("a.txt"), "Alpha. Beta.").unwrap();
    std::fs::write(docs.path().join("b.png"), [1u8, 2, 3, 4, 5]).unwrap();

    let engine = open_engine(data.path());
    let filter = FileFilter::default();
    engine.sync(docs.path(), &filter).unwrap();
    let before = engine.documents().unwrap();

    let report = engine.sync(docs.path(), &filter).unwrap();
    assert!(!report.changed());
    assert_eq!(report.unchanged, 2);

    let after = engine.documents().unwrap();
    let ids = |d: &[docsift::engine::DocumentInfo]| {
        d.iter().map(|i| (i.doc_id, i.vectors)).collect::<Vec<_>>()
    };
    assert_eq!(ids(&before), ids(&after));
}

#[test]
fn one_bad_document_does_not_stop_the_pass() {
    let data = tempfile::tempdir().unwrap();
    let docs = tempfile::tempdir().unwrap();
    std::fs::write(docs.path().join("good.txt"), "Useful content here.").unwrap();
    std::fs::write(docs.path().join("blank.txt"), "   \n\n").unwrap();
    std::fs::write(docs.path().join("broken.pdf"), b"not a pdf at all").unwrap();

    let engine = open_engine(data.path());
    let report = engine.sync(docs.path(), &FileFilter::default()).unwrap();

    assert_eq!(report.added, 1);
    assert_eq!(report.failed.len(), 2);
    assert!(report.failed.iter().any(|f| f.path.ends_with("blank.txt")));
    assert!(report.failed.iter().any(|f| f.path.ends_with("broken.pdf")));
    assert_eq!(engine.stats().unwrap().documents, 1);
}

#[test]
fn index_survives_reopen() {
    let data = tempfile::tempdir().unwrap();
    let docs = tempfile::tempdir().unwrap();
    std::fs::write(
        docs.path().join("garden.txt"),
        "Tomatoes need sun. Water them daily.",
    )
    .unwrap();
    std::fs::write(
        docs.path().join("engine.txt"),
        "Diesel engines use compression ignition.",
    )
    .unwrap();

    let before = {
        let engine = open_engine(data.path());
        engine.sync(docs.path(), &FileFilter::default()).unwrap();
        engine.documents().unwrap()
    };

    let engine = open_engine(data.path());
    let after = engine.documents().unwrap();
    assert_eq!(before.len(), after.len());
    for (b, a) in before.iter().zip(&after) {
        assert_eq!((b.doc_id, &b.path, b.vectors), (a.doc_id, &a.path, a.vectors));
    }

    let hits = engine
        .search_documents(&Query::Text("tomatoes sun water".into()), 1)
        .unwrap();
    assert_eq!(hits[0].filename, "garden.txt");

    let report = engine.sync(docs.path(), &FileFilter::default()).unwrap();
    assert!(!report.changed());
}

#[test]
fn missing_vectors_are_repaired_and_orphans_dropped() {
    let data = tempfile::tempdir().unwrap();
    let docs = tempfile::tempdir().unwrap();
    std::fs::write(docs.path().join("keep.txt"), "Kept document. Two lines.").unwrap();
    std::fs::write(docs.path().join("lost.txt"), "Vectors went missing.").unwrap();

    let (keep_id, lost_id) = {
        let engine = open_engine(data.path());
        engine.sync(docs.path(), &FileFilter::default()).unwrap();
        (doc_id_of(&engine, "keep.txt"), doc_id_of(&engine, "lost.txt"))
    };

    // Simulate an interrupted write: one document lost its vectors, the
    // other lost its registry entry.
    {
        let catalog = Catalog::open(&data.path().join("index.redb")).unwrap();
        let (mut index, mut registry) = catalog.load().unwrap();
        assert!(index.remove_range(lost_id) > 0);
        assert!(registry.remove(keep_id).is_some());
        catalog.persist(&mut index, &registry).unwrap();
    }

    let engine = open_engine(data.path());
    let report = engine.sync(docs.path(), &FileFilter::default()).unwrap();
    assert_eq!(report.repaired, 1);
    assert_eq!(report.orphans_removed, 1);
    assert_eq!(report.added, 1);

    assert_eq!(doc_id_of(&engine, "lost.txt"), lost_id);
    let readded = doc_id_of(&engine, "keep.txt");
    assert!(readded > keep_id.max(lost_id));

    let documents = engine.documents().unwrap();
    assert!(documents.iter().all(|d| d.vectors > 0));
    let stats = engine.stats().unwrap();
    assert_eq!(
        stats.vectors,
        documents.iter().map(|d| d.vectors).sum::<usize>()
    );
}

#[test]
fn text_query_reaches_images_and_empty_index_reports_nothing() {
    let data = tempfile::tempdir().unwrap();
    let docs = tempfile::tempdir().unwrap();
    let engine = open_engine(data.path());

    let err = engine
        .search(&Query::Text("anything".into()), 5)
        .unwrap_err();
    assert!(matches!(err, Error::EmptyResult));

    std::fs::write(docs.path().join("photo.png"), [9u8; 64]).unwrap();
    engine.sync(docs.path(), &FileFilter::default()).unwrap();

    let photo = doc_id_of(&engine, "photo.png");
    let hits = engine.search(&Query::Text("a photo".into()), 5).unwrap();
    assert_eq!(hits.len(), 1);
    assert_eq!(hits[0].doc_id, photo);

    let docs_list = engine.documents().unwrap();
    assert_eq!(docs_list[0].vectors, 1);
    assert_eq!(
        doc_id::unpack(doc_id::pack(photo, Modality::Image, 0).unwrap()),
        (photo, Modality::Image)
    );
}

/// A one-page PDF that selects font `/F1` without declaring any resources.
fn fontless_pdf() -> Vec<u8> {
    use lopdf::{Document, Object, Stream, dictionary};

    let mut doc = Document::with_version("1.5");
    let pages_id = doc.new_object_id();
    let content_id = doc.add_object(Stream::new(
        dictionary! {},
        b"BT /F1 12 Tf 72 712 Td (Hello) Tj ET".to_vec(),
    ));
    let page_id = doc.add_object(dictionary! {
        "Type" => "Page",
        "Parent" => pages_id,
        "Contents" => content_id,
        "MediaBox" => vec![0.into(), 0.into(), 612.into(), 792.into()],
    });
    doc.objects.insert(
        pages_id,
        Object::Dictionary(dictionary! {
            "Type" => "Pages",
            "Kids" => vec![page_id.into()],
            "Count" => 1,
        }),
    );
    let catalog_id = doc.add_object(dictionary! {
        "Type" => "Catalog",
        "Pages" => pages_id,
    });
    doc.trailer.set("Root", catalog_id);

    let mut out = Vec::new();
    doc.save_to(&mut out).unwrap();
    out
}

#[test]
fn malformed_pdf_leaves_engine_usable() {
    let data = tempfile::tempdir().unwrap();
    let docs = tempfile::tempdir().unwrap();
    std::fs::write(docs.path().join("good.txt"), "Sourdough needs a starter.").unwrap();
    std::fs::write(docs.path().join("weird.pdf"), fontless_pdf()).unwrap();

    let engine = open_engine(data.path());
    let report = engine.sync(docs.path(), &FileFilter::default()).unwrap();
    assert_eq!(report.added, 1);
    assert_eq!(report.failed.len(), 1);
    assert!(report.failed[0].path.ends_with("weird.pdf"));

    // The engine lock is still healthy afterwards.
    assert_eq!(engine.stats().unwrap().documents, 1);
    let hits = engine
        .search_documents(&Query::Text("sourdough starter".into()), 1)
        .unwrap();
    assert_eq!(hits[0].filename, "good.txt");

    let again = engine.sync(docs.path(), &FileFilter::default()).unwrap();
    assert_eq!((again.added, again.unchanged, again.failed.len()), (0, 1, 1));
}
