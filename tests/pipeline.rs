//! End-to-end passes over real images with the production backend.

use image::{GenericImageView, ImageFormat, RgbImage};
use imgpress::config::PressConfig;
use imgpress::dispatch::DispatchAction;
use imgpress::imaging::{ImageBackend, RustBackend};
use imgpress::metadata::{
    BackupSizes, FULL_ORIGINAL_BACKUP, Metadata, MimeType, RecordId, SizeEntry, SizeRequest,
    SizeRequests,
};
use imgpress::pass::{ImageState, PassError};
use imgpress::pipeline::{PassOutcome, PassReport, Pipeline, SizesOutcome};
use imgpress::snapshot;
use imgpress::store::{self, MemoryStore};
use imgpress::webp::{self, WebpPolicy, WebpSettings};
use std::collections::BTreeMap;
use std::fs::{self, File};
use std::io::BufWriter;
use std::path::Path;
use tempfile::TempDir;

// =========================================================================
// Fixtures
// =========================================================================

fn gradient(width: u32, height: u32) -> RgbImage {
    RgbImage::from_fn(width, height, |x, y| {
        image::Rgb([(x * 255 / width) as u8, (y * 255 / height) as u8, 90])
    })
}

fn write_jpeg(path: &Path, width: u32, height: u32) {
    gradient(width, height)
        .save_with_format(path, ImageFormat::Jpeg)
        .unwrap();
}

fn write_png(path: &Path, width: u32, height: u32) {
    gradient(width, height)
        .save_with_format(path, ImageFormat::Png)
        .unwrap();
}

/// Indexed PNG: left half palette entry 0 (fully transparent red), right
/// half entry 1 (opaque blue).
fn write_indexed_png(path: &Path, width: u32, height: u32) {
    let mut encoder = png::Encoder::new(BufWriter::new(File::create(path).unwrap()), width, height);
    encoder.set_color(png::ColorType::Indexed);
    encoder.set_depth(png::BitDepth::Eight);
    encoder.set_palette(vec![255, 0, 0, 0, 0, 255]);
    encoder.set_trns(vec![0, 255]);
    let pixels: Vec<u8> = (0..height)
        .flat_map(|_| (0..width).map(move |x| u8::from(x >= width / 2)))
        .collect();
    let mut writer = encoder.write_header().unwrap();
    writer.write_image_data(&pixels).unwrap();
    writer.finish().unwrap();
}

fn sizes() -> SizeRequests {
    [
        ("thumbnail", 150, 150, true),
        ("medium", 300, 300, false),
    ]
    .into_iter()
    .map(|(name, width, height, crop)| {
        (
            name.to_string(),
            SizeRequest {
                width,
                height,
                crop,
            },
        )
    })
    .collect()
}

/// Every file in `dir` with its bytes.
fn dir_contents(dir: &Path) -> BTreeMap<String, Vec<u8>> {
    fs::read_dir(dir)
        .unwrap()
        .map(|entry| {
            let entry = entry.unwrap();
            (
                entry.file_name().to_string_lossy().into_owned(),
                fs::read(entry.path()).unwrap(),
            )
        })
        .collect()
}

struct Harness {
    tmp: TempDir,
    backend: RustBackend,
    store: MemoryStore,
    config: PressConfig,
}

impl Harness {
    fn new() -> Self {
        Self {
            tmp: TempDir::new().unwrap(),
            backend: RustBackend::new(),
            store: MemoryStore::new(),
            config: PressConfig::default(),
        }
    }

    fn root(&self) -> &Path {
        self.tmp.path()
    }

    fn pipeline(&self) -> Pipeline<'_> {
        Pipeline::new(&self.backend, &self.store, &self.config, self.root())
    }

    /// Run both hooks the way a host does and persist what comes back.
    fn pass(&self, id: RecordId, mime: &str, proposed: &Metadata) -> SizesOutcome {
        let pipeline = self.pipeline();
        pipeline.before_metadata_destroyed(id, proposed).unwrap();
        let outcome = pipeline.on_new_sizes(id, mime, &sizes(), proposed);
        if matches!(outcome.outcome, PassOutcome::Completed(_)) {
            store::save_metadata(&self.store, id, &outcome.metadata).unwrap();
        }
        outcome
    }

    /// Regenerate: propose the stored identity with sizes cleared.
    fn regenerate(&self, id: RecordId, mime: &str) -> SizesOutcome {
        let stored = store::load_metadata(&self.store, id).unwrap().unwrap();
        let proposed = Metadata {
            sizes: Default::default(),
            ..stored
        };
        self.pass(id, mime, &proposed)
    }
}

fn report(outcome: &SizesOutcome) -> &PassReport {
    match &outcome.outcome {
        PassOutcome::Completed(report) => report,
        other => panic!("expected completed pass, got {other:?}"),
    }
}

// =========================================================================
// Resource guard
// =========================================================================

#[test]
fn big_jpeg_is_cloned_but_not_recompressed() {
    let h = Harness::new();
    write_jpeg(&h.root().join("big.jpg"), 3000, 2000);
    let before = fs::read(h.root().join("big.jpg")).unwrap();

    let outcome = h.pass(1, "image/jpeg", &Metadata::new("big.jpg", 3000, 2000));

    let report = report(&outcome);
    assert_eq!(report.state, ImageState::Lossy);
    assert_eq!(
        report.action,
        DispatchAction::ResourceGuardSkip {
            width: 3000,
            height: 2000
        }
    );
    assert_eq!(outcome.metadata.file, "big.jpg");
    assert_eq!(outcome.metadata.original_image, None);
    assert_eq!(fs::read(h.root().join("big.jpg")).unwrap(), before);
    assert!(!h.root().join("big-scaled.jpg").exists());

    let clone = h.root().join("big.jpg.webp");
    assert_eq!(report.clone.as_deref(), Some(clone.as_path()));
    assert_eq!(image::open(&clone).unwrap().dimensions(), (3000, 2000));
}

// =========================================================================
// Edited restore
// =========================================================================

#[test]
fn regenerate_restores_edited_identity() {
    let h = Harness::new();
    write_jpeg(&h.root().join("photo.jpg"), 400, 300);
    write_jpeg(&h.root().join("photo-e1700000000000.jpg"), 300, 200);

    let edited = Metadata::new("photo-e1700000000000.jpg", 300, 200);
    store::save_metadata(&h.store, 1, &edited).unwrap();
    let mut backups = BackupSizes::new();
    backups.insert(
        FULL_ORIGINAL_BACKUP.to_string(),
        SizeEntry {
            file: "photo.jpg".into(),
            width: 400,
            height: 300,
        },
    );
    snapshot::save_backup_sizes(&h.store, 1, &backups).unwrap();

    // The host proposes the pristine original on regenerate.
    let outcome = h.pass(1, "image/jpeg", &Metadata::new("photo.jpg", 400, 300));

    let report = report(&outcome);
    assert_eq!(report.state, ImageState::Edited);
    assert!(report.regenerate);
    assert_eq!(outcome.metadata.file, edited.file);
    assert_eq!(outcome.metadata.width, edited.width);
    assert_eq!(outcome.metadata.height, edited.height);
    assert_eq!(
        outcome.metadata.sizes["thumbnail"].file,
        "photo-e1700000000000-150x150.jpg"
    );
    assert!(h.root().join("photo-e1700000000000.jpg.webp").exists());
}

// =========================================================================
// EXIF orientation
// =========================================================================

/// Big-endian EXIF APP1 segment with a single Orientation entry.
fn exif_orientation_segment(orientation: u16) -> Vec<u8> {
    let mut payload = b"Exif\0\0MM\x00\x2a\x00\x00\x00\x08".to_vec();
    payload.extend_from_slice(&[0x00, 0x01]);
    payload.extend_from_slice(&[0x01, 0x12, 0x00, 0x03, 0x00, 0x00, 0x00, 0x01]);
    payload.extend_from_slice(&orientation.to_be_bytes());
    payload.extend_from_slice(&[0x00; 6]);

    let mut segment = vec![0xFF, 0xE1];
    segment.extend_from_slice(&((payload.len() + 2) as u16).to_be_bytes());
    segment.extend_from_slice(&payload);
    segment
}

/// Quality-100 JPEG of stored size `width`x`height` tagged with `orientation`.
fn write_oriented_jpeg(path: &Path, width: u32, height: u32, orientation: u16) {
    let mut encoded = Vec::new();
    gradient(width, height)
        .write_with_encoder(image::codecs::jpeg::JpegEncoder::new_with_quality(
            &mut encoded,
            100,
        ))
        .unwrap();
    let mut bytes = encoded[..2].to_vec();
    bytes.extend(exif_orientation_segment(orientation));
    bytes.extend_from_slice(&encoded[2..]);
    fs::write(path, bytes).unwrap();
}

#[test]
fn oriented_jpeg_stays_upright_after_recompression() {
    let h = Harness::new();
    write_oriented_jpeg(&h.root().join("photo.jpg"), 400, 200, 6);

    let outcome = h.pass(1, "image/jpeg", &Metadata::new("photo.jpg", 400, 200));

    let report = report(&outcome);
    assert_eq!(report.state, ImageState::Lossy);
    assert!(matches!(
        report.action,
        DispatchAction::Compressed { replaced: true, .. }
    ));
    assert_eq!(outcome.metadata.file, "photo-scaled.jpg");
    assert_eq!(outcome.metadata.original_image.as_deref(), Some("photo.jpg"));
    assert_eq!((outcome.metadata.width, outcome.metadata.height), (200, 400));

    let attached = h.root().join("photo-scaled.jpg");
    assert_eq!(h.backend.read_orientation(&attached).unwrap(), None);
    assert_eq!(image::open(&attached).unwrap().dimensions(), (200, 400));

    let medium = &outcome.metadata.sizes["medium"];
    assert_eq!(medium.file, "photo-150x300.jpg");
    assert_eq!((medium.width, medium.height), (150, 300));
    assert_eq!(
        image::open(h.root().join("photo-150x300.jpg"))
            .unwrap()
            .dimensions(),
        (150, 300)
    );
}

// =========================================================================
// Stale snapshot
// =========================================================================

#[test]
fn stale_snapshot_returns_input_sizes() {
    let h = Harness::new();
    write_jpeg(&h.root().join("new.jpg"), 200, 100);
    store::save_metadata(&h.store, 1, &Metadata::new("gone.jpg", 200, 100)).unwrap();
    let proposed = Metadata::new("new.jpg", 200, 100);

    let outcome = h.pass(1, "image/jpeg", &proposed);

    assert!(matches!(
        outcome.outcome,
        PassOutcome::Failed(PassError::StaleSnapshot(ref p)) if p.ends_with("gone.jpg")
    ));
    assert_eq!(outcome.sizes, sizes());
    assert_eq!(outcome.metadata, proposed);
    assert!(!h.root().join("new.jpg.webp").exists());
}

// =========================================================================
// Palette PNG transparency
// =========================================================================

#[test]
fn indexed_png_clone_keeps_transparency() {
    let h = Harness::new();
    let source = h.root().join("logo.png");
    write_indexed_png(&source, 32, 16);

    let clone = webp::clone_webp(
        &h.backend,
        &source,
        MimeType::Png,
        WebpPolicy::Always,
        &WebpSettings::default(),
    )
    .unwrap()
    .unwrap();

    let decoded = image::open(&clone).unwrap().to_rgba8();
    let transparent = decoded.get_pixel(2, 8);
    assert!(transparent[3] <= 5, "expected transparent, got {transparent:?}");
    let opaque = decoded.get_pixel(29, 8);
    assert!(opaque[3] >= 250);
    assert!(opaque[2] > 200, "expected blue, got {opaque:?}");
}

// =========================================================================
// Clone policies and container contract
// =========================================================================

#[test]
fn if_missing_never_overwrites_existing_clone() {
    let h = Harness::new();
    let source = h.root().join("photo.jpg");
    write_jpeg(&source, 64, 48);
    let existing = h.root().join("photo.jpg.webp");
    fs::write(&existing, b"hand-made clone").unwrap();

    let result = webp::clone_webp(
        &h.backend,
        &source,
        MimeType::Jpeg,
        WebpPolicy::IfMissing,
        &WebpSettings::default(),
    )
    .unwrap();

    assert_eq!(result, Some(existing.clone()));
    assert_eq!(fs::read(&existing).unwrap(), b"hand-made clone");
}

#[test]
fn delete_policy_always_leaves_no_clone() {
    let h = Harness::new();
    let source = h.root().join("photo.jpg");
    write_jpeg(&source, 64, 48);
    let clone = h.root().join("photo.jpg.webp");

    for _ in 0..2 {
        let result = webp::clone_webp(
            &h.backend,
            &source,
            MimeType::Jpeg,
            WebpPolicy::Delete,
            &WebpSettings::default(),
        )
        .unwrap();
        assert_eq!(result, None);
        assert!(!clone.exists());
        fs::write(&clone, b"stale").unwrap();
    }
}

#[test]
fn clones_are_deterministic_and_even_length() {
    let h = Harness::new();
    for (name, mime) in [("a.jpg", MimeType::Jpeg), ("b.png", MimeType::Png)] {
        let source = h.root().join(name);
        match mime {
            MimeType::Jpeg => write_jpeg(&source, 97, 61),
            MimeType::Png => write_png(&source, 97, 61),
        }

        let clone = |policy| {
            let path = webp::clone_webp(&h.backend, &source, mime, policy, &WebpSettings::default())
                .unwrap()
                .unwrap();
            fs::read(path).unwrap()
        };
        let first = clone(WebpPolicy::Always);
        let second = clone(WebpPolicy::Always);

        assert_eq!(first, second, "{name} clone is not deterministic");
        assert_eq!(first.len() % 2, 0, "{name} clone has odd length");
        assert_eq!(&first[0..4], b"RIFF");
    }
}

// =========================================================================
// Idempotency per state
// =========================================================================

/// Pass once, then again: the second pass must change nothing.
fn assert_second_pass_is_noop(h: &Harness, id: RecordId, mime: &str, proposed: &Metadata) {
    let first = h.pass(id, mime, proposed);
    report(&first);
    let files_after_first = dir_contents(h.root());

    let second = h.regenerate(id, mime);
    report(&second);

    assert_eq!(second.metadata, first.metadata);
    assert_eq!(second.sizes, first.sizes);
    let files_after_second = dir_contents(h.root());
    assert_eq!(
        files_after_second.keys().collect::<Vec<_>>(),
        files_after_first.keys().collect::<Vec<_>>()
    );
    assert!(
        files_after_second == files_after_first,
        "second pass rewrote file bytes"
    );
}

#[test]
fn lossy_pass_is_idempotent() {
    let h = Harness::new();
    write_jpeg(&h.root().join("photo.jpg"), 320, 240);
    assert_second_pass_is_noop(&h, 1, "image/jpeg", &Metadata::new("photo.jpg", 320, 240));
}

#[test]
fn lossless_pass_is_idempotent() {
    let h = Harness::new();
    write_png(&h.root().join("logo.png"), 320, 240);
    assert_second_pass_is_noop(&h, 1, "image/png", &Metadata::new("logo.png", 320, 240));
}

#[test]
fn scaled_pass_is_idempotent() {
    let h = Harness::new();
    write_jpeg(&h.root().join("photo.jpg"), 640, 480);
    write_jpeg(&h.root().join("photo-scaled.jpg"), 320, 240);
    let mut proposed = Metadata::new("photo-scaled.jpg", 320, 240);
    proposed.original_image = Some("photo.jpg".into());
    assert_second_pass_is_noop(&h, 1, "image/jpeg", &proposed);
}

#[test]
fn rotated_pass_is_idempotent() {
    let h = Harness::new();
    write_jpeg(&h.root().join("photo.jpg"), 240, 320);
    write_jpeg(&h.root().join("photo-rotated.jpg"), 320, 240);
    let mut proposed = Metadata::new("photo-rotated.jpg", 320, 240);
    proposed.original_image = Some("photo.jpg".into());

    let first = h.pass(1, "image/jpeg", &proposed);
    assert_eq!(report(&first).action, DispatchAction::CompressedInPlace);
    let files = dir_contents(h.root());

    let second = h.regenerate(1, "image/jpeg");
    assert_eq!(report(&second).action, DispatchAction::AlreadyCompressed);
    assert_eq!(second.metadata, first.metadata);
    assert!(dir_contents(h.root()) == files);
}

#[test]
fn edited_pass_is_idempotent() {
    let h = Harness::new();
    write_jpeg(&h.root().join("photo.jpg"), 400, 300);
    write_jpeg(&h.root().join("photo-e1700000000000.jpg"), 320, 240);
    let mut backups = BackupSizes::new();
    backups.insert(
        FULL_ORIGINAL_BACKUP.to_string(),
        SizeEntry {
            file: "photo.jpg".into(),
            width: 400,
            height: 300,
        },
    );
    snapshot::save_backup_sizes(&h.store, 1, &backups).unwrap();
    store::save_metadata(&h.store, 1, &Metadata::new("photo-e1700000000000.jpg", 320, 240))
        .unwrap();

    let first = h.regenerate(1, "image/jpeg");
    assert_eq!(report(&first).state, ImageState::Edited);
    let files = dir_contents(h.root());

    let second = h.regenerate(1, "image/jpeg");
    assert_eq!(report(&second).state, ImageState::Edited);
    assert_eq!(second.metadata, first.metadata);
    assert!(dir_contents(h.root()) == files);
}
