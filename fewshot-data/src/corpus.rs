//! COCO-style annotation corpus and its on-disk format.

use crate::{
    common::*,
    error::{DanglingRef, FoldError},
};
use tempfile::NamedTempFile;

pub type ImageId = u64;
pub type AnnotationId = u64;
pub type CategoryId = u64;

/// An image record.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Image {
    pub id: ImageId,
    pub file_name: String,
    pub width: u32,
    pub height: u32,
    /// Fields this crate does not interpret, kept for round-trips.
    #[serde(flatten)]
    pub extra: serde_json::Map<String, Value>,
}

/// An object annotation.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Annotation {
    pub id: AnnotationId,
    pub image_id: ImageId,
    pub category_id: CategoryId,
    pub bbox: BBox,
    pub area: f64,
    #[serde(flatten)]
    pub extra: serde_json::Map<String, Value>,
}

/// A category record.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Category {
    pub id: CategoryId,
    pub name: String,
    #[serde(flatten)]
    pub extra: serde_json::Map<String, Value>,
}

/// Bounding box in `[left, top, width, height]` pixel layout.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(from = "[f64; 4]", into = "[f64; 4]")]
pub struct BBox {
    pub x: f64,
    pub y: f64,
    pub w: f64,
    pub h: f64,
}

impl BBox {
    /// Returns true if both sides are positive.
    pub fn is_valid(&self) -> bool {
        self.w > 0.0 && self.h > 0.0
    }
}

impl From<[f64; 4]> for BBox {
    fn from([x, y, w, h]: [f64; 4]) -> Self {
        Self { x, y, w, h }
    }
}

impl From<BBox> for [f64; 4] {
    fn from(bbox: BBox) -> Self {
        let BBox { x, y, w, h } = bbox;
        [x, y, w, h]
    }
}

/// The corpus exactly as serialized, without any cross-reference checks.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RawCorpus {
    pub images: Vec<Image>,
    pub annotations: Vec<Annotation>,
    pub categories: Vec<Category>,
}

impl RawCorpus {
    /// Reads and parses a corpus file.
    pub fn load(path: impl AsRef<Path>) -> Result<Self, FoldError> {
        let path = path.as_ref();
        let reader = BufReader::new(File::open(path).map_err(|err| FoldError::io(path, err))?);
        serde_json::from_reader(reader).map_err(|err| {
            if err.is_io() {
                FoldError::io(path, err.into())
            } else {
                FoldError::parse(format_args!("'{}'", path.display()), err)
            }
        })
    }

    /// Removes annotations whose box has a non-positive side.
    ///
    /// Returns the number of removed annotations.
    pub fn drop_degenerate_boxes(&mut self) -> usize {
        let before = self.annotations.len();
        self.annotations.retain(|ann| ann.bbox.is_valid());
        let dropped = before - self.annotations.len();

        if dropped > 0 {
            warn!("filtered out {} annotations with degenerate boxes", dropped);
        }

        dropped
    }
}

/// A validated annotation corpus.
///
/// Images and categories are keyed by id and keep their file order.
/// Every annotation refers to an image and a category of the same corpus.
#[derive(Debug, Clone, PartialEq)]
pub struct Corpus {
    images: IndexMap<ImageId, Image>,
    annotations: Vec<Annotation>,
    categories: IndexMap<CategoryId, Category>,
}

impl Corpus {
    /// Loads a corpus file and validates it.
    pub fn load(path: impl AsRef<Path>) -> Result<Self, FoldError> {
        let path = path.as_ref();
        let raw = RawCorpus::load(path)?;
        Self::build(raw, &format!("'{}'", path.display()))
    }

    /// Loads a corpus file, dropping degenerate boxes instead of failing on them.
    pub fn load_sanitized(path: impl AsRef<Path>) -> Result<Self, FoldError> {
        let path = path.as_ref();
        let mut raw = RawCorpus::load(path)?;
        raw.drop_degenerate_boxes();
        Self::build(raw, &format!("'{}'", path.display()))
    }

    /// Validates an in-memory raw corpus.
    pub fn from_raw(raw: RawCorpus) -> Result<Self, FoldError> {
        Self::build(raw, "in-memory corpus")
    }

    fn build(raw: RawCorpus, origin: &str) -> Result<Self, FoldError> {
        let RawCorpus {
            images: image_list,
            annotations,
            categories: category_list,
        } = raw;

        let mut images = IndexMap::with_capacity(image_list.len());
        for image in image_list {
            let id = image.id;
            if images.insert(id, image).is_some() {
                return Err(FoldError::parse(origin, format!("duplicated image id {}", id)));
            }
        }

        let mut categories = IndexMap::with_capacity(category_list.len());
        for category in category_list {
            let id = category.id;
            if categories.insert(id, category).is_some() {
                return Err(FoldError::parse(
                    origin,
                    format!("duplicated category id {}", id),
                ));
            }
        }

        let mut annotation_ids = HashSet::with_capacity(annotations.len());
        for ann in &annotations {
            if !annotation_ids.insert(ann.id) {
                return Err(FoldError::parse(
                    origin,
                    format!("duplicated annotation id {}", ann.id),
                ));
            }
            if !ann.bbox.is_valid() {
                return Err(FoldError::parse(
                    origin,
                    format!(
                        "annotation {} has a degenerate box {:?}",
                        ann.id,
                        <[f64; 4]>::from(ann.bbox)
                    ),
                ));
            }
            if !images.contains_key(&ann.image_id) {
                return Err(FoldError::ReferentialIntegrity {
                    annotation_id: ann.id,
                    target: DanglingRef::MissingImage(ann.image_id),
                });
            }
            if !categories.contains_key(&ann.category_id) {
                return Err(FoldError::ReferentialIntegrity {
                    annotation_id: ann.id,
                    target: DanglingRef::UndefinedCategory(ann.category_id),
                });
            }
        }

        Ok(Self {
            images,
            annotations,
            categories,
        })
    }

    /// Assembles a corpus from parts already known to be consistent.
    pub(crate) fn from_parts(
        images: IndexMap<ImageId, Image>,
        annotations: Vec<Annotation>,
        categories: IndexMap<CategoryId, Category>,
    ) -> Self {
        debug_assert!(annotations.iter().all(|ann| {
            images.contains_key(&ann.image_id) && categories.contains_key(&ann.category_id)
        }));

        Self {
            images,
            annotations,
            categories,
        }
    }

    pub fn images(&self) -> &IndexMap<ImageId, Image> {
        &self.images
    }

    pub fn annotations(&self) -> &[Annotation] {
        &self.annotations
    }

    pub fn categories(&self) -> &IndexMap<CategoryId, Category> {
        &self.categories
    }

    pub fn image_ids(&self) -> BTreeSet<ImageId> {
        self.images.keys().copied().collect()
    }

    pub fn category_ids(&self) -> BTreeSet<CategoryId> {
        self.categories.keys().copied().collect()
    }

    /// Category ids that actually occur in annotations.
    pub fn annotated_category_ids(&self) -> BTreeSet<CategoryId> {
        self.annotations.iter().map(|ann| ann.category_id).collect()
    }

    pub fn into_raw(self) -> RawCorpus {
        RawCorpus {
            images: self.images.into_values().collect(),
            annotations: self.annotations,
            categories: self.categories.into_values().collect(),
        }
    }

    /// Serializes the corpus in compact JSON.
    pub fn to_json_vec(&self) -> Result<Vec<u8>, serde_json::Error> {
        serde_json::to_vec(self)
    }

    /// Writes the corpus to `path` with [save_json].
    pub fn save(&self, path: impl AsRef<Path>) -> Result<(), FoldError> {
        save_json(path, self, false)
    }
}

/// Writes a value as JSON to `path`.
///
/// The content goes to a temporary file in the destination directory,
/// which is renamed onto `path` once completely written. Missing parent
/// directories are created.
pub fn save_json<T>(path: impl AsRef<Path>, value: &T, pretty: bool) -> Result<(), FoldError>
where
    T: Serialize + ?Sized,
{
    let path = path.as_ref();
    let dir = match path.parent() {
        Some(dir) if !dir.as_os_str().is_empty() => dir,
        _ => Path::new("."),
    };
    fs::create_dir_all(dir).map_err(|err| FoldError::io(dir, err))?;

    let mut file = NamedTempFile::new_in(dir).map_err(|err| FoldError::io(dir, err))?;
    {
        let mut writer = BufWriter::new(file.as_file_mut());
        let result = if pretty {
            serde_json::to_writer_pretty(&mut writer, value)
        } else {
            serde_json::to_writer(&mut writer, value)
        };
        result.map_err(|err| FoldError::io(path, err.into()))?;
        writer.flush().map_err(|err| FoldError::io(path, err))?;
    }
    file.persist(path)
        .map_err(|err| FoldError::io(path, err.error))?;

    Ok(())
}

impl Serialize for Corpus {
    fn serialize<S>(&self, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        let mut state = serializer.serialize_struct("Corpus", 3)?;
        state.serialize_field("images", &Values(&self.images))?;
        state.serialize_field("annotations", &self.annotations)?;
        state.serialize_field("categories", &Values(&self.categories))?;
        state.end()
    }
}

/// Serializes the values of a keyed table as a sequence.
struct Values<'a, K, V>(&'a IndexMap<K, V>);

impl<'a, K, V> Serialize for Values<'a, K, V>
where
    V: Serialize,
{
    fn serialize<S>(&self, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        serializer.collect_seq(self.0.values())
    }
}
