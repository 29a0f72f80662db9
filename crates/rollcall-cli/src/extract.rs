//! Roster extraction: a directory of student photos in, a descriptor
//! CSV out.
//!
//! The photo directory holds one subdirectory per student, named
//! `CODE_Display Name` (everything before the first underscore is the
//! roster code). Every readable photo containing a detectable face
//! contributes one descriptor; the student's roster row is the
//! per-dimension average. A student whose photos yield no descriptors
//! still gets a row, with every value zero, so the roster stays in
//! sync with enrollment.

use std::path::{Path, PathBuf};

use anyhow::{bail, Context, Result};

use rollcall_core::{
    DescriptorExtractor, Embedding, FaceDetector, DESCRIPTOR_MODEL_FILE, DETECTOR_MODEL_FILE,
};

const IMAGE_EXTENSIONS: [&str; 4] = ["jpg", "jpeg", "png", "bmp"];

pub fn run(photos: &Path, out: &Path, model_dir: &Path) -> Result<()> {
    if !photos.is_dir() {
        bail!("photo directory not found: {}", photos.display());
    }

    let mut detector = FaceDetector::load(&model_dir.join(DETECTOR_MODEL_FILE))?;
    let mut extractor = DescriptorExtractor::load(&model_dir.join(DESCRIPTOR_MODEL_FILE))?;

    let students = student_dirs(photos)?;
    if students.is_empty() {
        bail!(
            "no student directories in {} (expected subdirectories named CODE_Display Name)",
            photos.display()
        );
    }

    let placeholders = write_roster(&students, out, |photo| {
        describe_photo(&mut detector, &mut extractor, photo)
    })?;

    println!(
        "wrote {} roster entries to {} ({} placeholder rows)",
        students.len(),
        out.display(),
        placeholders
    );
    Ok(())
}

struct StudentDir {
    code: String,
    name: String,
    path: PathBuf,
}

/// Scan the photo root for student directories, sorted by code so the
/// roster comes out in a stable order.
fn student_dirs(photos: &Path) -> Result<Vec<StudentDir>> {
    let mut students = Vec::new();

    for entry in photos
        .read_dir()
        .with_context(|| format!("read photo directory {}", photos.display()))?
    {
        let entry = entry?;
        if !entry.file_type()?.is_dir() {
            continue;
        }
        let dir_name = entry.file_name();
        let Some(dir_name) = dir_name.to_str() else {
            tracing::warn!(path = %entry.path().display(), "skipping non-UTF-8 directory name");
            continue;
        };
        let Some((code, name)) = dir_name.split_once('_') else {
            tracing::warn!(directory = dir_name, "skipping directory without CODE_Name pattern");
            continue;
        };
        if code.is_empty() || name.is_empty() {
            tracing::warn!(directory = dir_name, "skipping directory with empty code or name");
            continue;
        }
        students.push(StudentDir {
            code: code.to_string(),
            name: name.to_string(),
            path: entry.path(),
        });
    }

    students.sort_by(|a, b| a.code.cmp(&b.code));
    Ok(students)
}

/// Write one roster row per student: the per-dimension average of the
/// descriptors `describe` yields for their photos, or the all-zero
/// placeholder when none are usable. Returns the placeholder-row count.
fn write_roster(
    students: &[StudentDir],
    out: &Path,
    mut describe: impl FnMut(&Path) -> Option<Embedding>,
) -> Result<usize> {
    let mut writer = csv::WriterBuilder::new()
        .has_headers(false)
        .from_path(out)
        .with_context(|| format!("create roster file {}", out.display()))?;

    let mut placeholders = 0usize;
    for student in students {
        let descriptors = collect_descriptors(student, &mut describe)?;
        let average = if descriptors.is_empty() {
            tracing::warn!(
                code = %student.code,
                name = %student.name,
                "no usable photos, writing placeholder row"
            );
            placeholders += 1;
            Embedding::zeros()
        } else {
            tracing::info!(
                code = %student.code,
                name = %student.name,
                photos = descriptors.len(),
                "student enrolled"
            );
            Embedding::mean(&descriptors)
        };

        let mut record = vec![student.code.clone(), student.name.clone()];
        record.extend(average.values.iter().map(|v| v.to_string()));
        writer.write_record(&record)?;
    }
    writer.flush()?;
    Ok(placeholders)
}

/// Run every photo in the student's directory through `describe`, in
/// sorted order. Photos it rejects are skipped; only files with a
/// recognized image extension are offered at all.
fn collect_descriptors(
    student: &StudentDir,
    describe: &mut impl FnMut(&Path) -> Option<Embedding>,
) -> Result<Vec<Embedding>> {
    let mut photos: Vec<PathBuf> = student
        .path
        .read_dir()
        .with_context(|| format!("read student directory {}", student.path.display()))?
        .filter_map(|entry| entry.ok().map(|e| e.path()))
        .filter(|path| {
            path.extension()
                .and_then(|ext| ext.to_str())
                .is_some_and(|ext| IMAGE_EXTENSIONS.contains(&ext.to_ascii_lowercase().as_str()))
        })
        .collect();
    photos.sort();

    let mut descriptors = Vec::new();
    for photo in &photos {
        if let Some(descriptor) = describe(photo) {
            descriptors.push(descriptor);
        }
    }
    Ok(descriptors)
}

/// Run one photo through the models. Unreadable photos, photos without
/// a detectable face, and extraction failures are logged and skipped
/// rather than failing the whole extraction.
fn describe_photo(
    detector: &mut FaceDetector,
    extractor: &mut DescriptorExtractor,
    photo: &Path,
) -> Option<Embedding> {
    let image = match image::open(photo) {
        Ok(image) => image.to_luma8(),
        Err(err) => {
            tracing::warn!(photo = %photo.display(), error = %err, "unreadable photo, skipping");
            return None;
        }
    };
    let (width, height) = image.dimensions();
    let gray = image.into_raw();

    let faces = match detector.detect(&gray, width, height) {
        Ok(faces) => faces,
        Err(err) => {
            tracing::warn!(photo = %photo.display(), error = %err, "detection failed, skipping");
            return None;
        }
    };
    // Detections come back ordered by confidence; the best one is
    // taken to be the student.
    let Some(face) = faces.first() else {
        tracing::warn!(photo = %photo.display(), "no face found, skipping");
        return None;
    };

    match extractor.extract(&gray, width, height, face) {
        Ok(descriptor) => Some(descriptor),
        Err(err) => {
            tracing::warn!(photo = %photo.display(), error = %err, "descriptor extraction failed, skipping");
            None
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rollcall_core::{Roster, EMBEDDING_DIM};
    use std::fs;

    fn embedding(fill: f32) -> Embedding {
        Embedding {
            values: vec![fill; EMBEDDING_DIM],
        }
    }

    #[test]
    fn student_dirs_parses_code_and_name() {
        let root = tempfile::tempdir().unwrap();
        fs::create_dir(root.path().join("S002_Bob Okafor")).unwrap();
        fs::create_dir(root.path().join("S001_Alice Johnson")).unwrap();
        fs::create_dir(root.path().join("stray")).unwrap();
        fs::write(root.path().join("notes.txt"), "x").unwrap();

        let students = student_dirs(root.path()).unwrap();
        assert_eq!(students.len(), 2);
        assert_eq!(students[0].code, "S001");
        assert_eq!(students[0].name, "Alice Johnson");
        assert_eq!(students[1].code, "S002");
        assert_eq!(students[1].name, "Bob Okafor");
    }

    #[test]
    fn student_dirs_keeps_underscores_in_the_name() {
        let root = tempfile::tempdir().unwrap();
        fs::create_dir(root.path().join("S003_Chen_Wei")).unwrap();

        let students = student_dirs(root.path()).unwrap();
        assert_eq!(students.len(), 1);
        assert_eq!(students[0].code, "S003");
        assert_eq!(students[0].name, "Chen_Wei");
    }

    #[test]
    fn student_dirs_rejects_empty_code_or_name() {
        let root = tempfile::tempdir().unwrap();
        fs::create_dir(root.path().join("_Nameless")).unwrap();
        fs::create_dir(root.path().join("S004_")).unwrap();

        let students = student_dirs(root.path()).unwrap();
        assert!(students.is_empty());
    }

    #[test]
    fn collect_descriptors_skips_rejected_photos() {
        let root = tempfile::tempdir().unwrap();
        let dir = root.path().join("S001_Alice Johnson");
        fs::create_dir(&dir).unwrap();
        fs::write(dir.join("good.jpg"), "x").unwrap();
        fs::write(dir.join("blurry.jpg"), "x").unwrap();
        fs::write(dir.join("notes.txt"), "x").unwrap();

        let students = student_dirs(root.path()).unwrap();
        let mut seen = Vec::new();
        let descriptors = collect_descriptors(&students[0], &mut |photo: &Path| {
            seen.push(photo.file_name().unwrap().to_str().unwrap().to_string());
            photo.ends_with("good.jpg").then(|| embedding(0.5))
        })
        .unwrap();

        // notes.txt is never offered; the rejected photo contributes
        // nothing but does not fail the student.
        assert_eq!(seen, ["blurry.jpg", "good.jpg"]);
        assert_eq!(descriptors.len(), 1);
    }

    #[test]
    fn a_student_with_no_usable_photos_gets_a_placeholder_row() {
        let root = tempfile::tempdir().unwrap();
        let alice = root.path().join("S001_Alice Johnson");
        let bob = root.path().join("S002_Bob Okafor");
        fs::create_dir(&alice).unwrap();
        fs::create_dir(&bob).unwrap();
        fs::write(alice.join("face.jpg"), "x").unwrap();
        fs::write(bob.join("face.jpg"), "x").unwrap();

        let out = root.path().join("roster.csv");
        let students = student_dirs(root.path()).unwrap();

        // None of Alice's photos yield a descriptor; Bob's do.
        let placeholders = write_roster(&students, &out, |photo: &Path| {
            photo.starts_with(&bob).then(|| embedding(0.25))
        })
        .unwrap();
        assert_eq!(placeholders, 1);

        let mut reader = csv::ReaderBuilder::new()
            .has_headers(false)
            .from_path(&out)
            .unwrap();
        let records: Vec<csv::StringRecord> =
            reader.records().collect::<Result<_, _>>().unwrap();
        assert_eq!(records.len(), 2);

        let placeholder = &records[0];
        assert_eq!(&placeholder[0], "S001");
        assert_eq!(placeholder.len(), 2 + EMBEDDING_DIM);
        assert!((2..placeholder.len()).all(|i| placeholder[i].parse::<f32>().unwrap() == 0.0));

        let enrolled = &records[1];
        assert_eq!(&enrolled[0], "S002");
        assert!((enrolled[2].parse::<f32>().unwrap() - 0.25).abs() < 1e-6);

        // The row the extractor writes is the row the session refuses
        // to match.
        let roster = Roster::load(&out).unwrap();
        assert!(!roster.entries()[0].matchable);
        assert!(roster.entries()[1].matchable);
    }
}
