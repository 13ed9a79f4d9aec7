//! Category universe and base/novel fold definitions.

use crate::{
    common::*,
    corpus::{CategoryId, Corpus},
    error::FoldError,
};

/// The VizWiz few-shot category names. The category id is the index plus one.
pub const VIZWIZ_CATEGORIES: [&str; 100] = [
    "album", "apple", "backpack", "banana", "bar", "bed", "bird", "book", "bottle", "bowl",
    "bracelet", "broccoli", "cake", "calculator", "car", "carrot", "cash", "cat", "ceiling_fan",
    "cell_phone", "cereal_box", "chair", "clock", "coin", "computer_keyboard", "computer_mouse",
    "couch", "crockpot", "cup", "curtain", "dial", "dog", "dog_collar", "drawer", "electric_fan",
    "envelope", "flashdrive", "food_menu", "fork", "gift_card", "guitar", "hat", "house", "ipad",
    "key", "knife", "lamp", "landline_phone", "laptop", "laundry_machine", "magazine",
    "microphone", "microwave", "monitor", "newspaper", "orange", "oven", "packet", "painting",
    "pen", "perfume", "person", "piano", "pillow", "pizza", "plate", "printer", "purse", "ramen",
    "receipt", "refrigerator", "remote", "ring", "rug", "sandal", "sandwich", "scale", "shoe",
    "sign", "sink", "sock", "speaker", "spoon", "stapler", "sticker", "stool", "stove",
    "strawberry", "suitcase", "sweatshirt", "television", "toaster", "towel", "truck", "tube",
    "vacuum", "vase", "wallet", "watch", "wine",
];

/// The novel categories of the four OD-25 folds.
const OD25_NOVEL_CATEGORIES: [(&str, [&str; 25]); 4] = [
    (
        "OD25_0",
        [
            "couch", "watch", "drawer", "landline_phone", "strawberry", "painting", "pillow",
            "envelope", "bracelet", "calculator", "car", "cash", "cat", "coin", "crockpot",
            "guitar", "fork", "monitor", "pen", "ring", "purse", "sink", "sock", "television",
            "truck",
        ],
    ),
    (
        "OD25_1",
        [
            "bird", "album", "ceiling_fan", "cereal_box", "dial", "dog_collar", "electric_fan",
            "food_menu", "gift_card", "ipad", "microphone", "piano", "printer", "sandal", "scale",
            "shoe", "sign", "stapler", "sticker", "stool", "stove", "tube", "towel", "vase",
            "wallet",
        ],
    ),
    (
        "OD25_2",
        [
            "backpack", "banana", "bowl", "broccoli", "chair", "clock", "computer_mouse",
            "curtain", "flashdrive", "hat", "house", "key", "knife", "laundry_machine",
            "magazine", "newspaper", "orange", "oven", "packet", "perfume", "pizza", "ramen",
            "receipt", "suitcase", "sweatshirt",
        ],
    ),
    (
        "OD25_3",
        [
            "apple", "bar", "bed", "book", "bottle", "cake", "cell_phone", "computer_keyboard",
            "cup", "dog", "lamp", "laptop", "microwave", "person", "plate", "refrigerator",
            "remote", "rug", "sandwich", "speaker", "spoon", "toaster", "towel", "vacuum", "wine",
        ],
    ),
];

/// The full set of categories folds are drawn from.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CategoryUniverse {
    names: IndexMap<CategoryId, String>,
}

impl CategoryUniverse {
    /// The 100 VizWiz categories with ids `1..=100`.
    pub fn vizwiz() -> Self {
        let names = VIZWIZ_CATEGORIES
            .iter()
            .enumerate()
            .map(|(index, &name)| (index as CategoryId + 1, name.to_owned()))
            .collect();
        Self { names }
    }

    /// Takes the categories defined by a corpus as the universe.
    pub fn from_corpus(corpus: &Corpus) -> Result<Self, FoldError> {
        Self::from_names(
            corpus
                .categories()
                .values()
                .map(|cat| (cat.id, cat.name.clone())),
        )
    }

    pub fn from_names<I>(names: I) -> Result<Self, FoldError>
    where
        I: IntoIterator<Item = (CategoryId, String)>,
    {
        let mut map = IndexMap::new();
        let mut seen = HashSet::new();

        for (id, name) in names {
            if !seen.insert(name.clone()) {
                return Err(FoldError::parse(
                    "category universe",
                    format!("duplicated category name '{}'", name),
                ));
            }
            if map.insert(id, name).is_some() {
                return Err(FoldError::parse(
                    "category universe",
                    format!("duplicated category id {}", id),
                ));
            }
        }

        Ok(Self { names: map })
    }

    pub fn len(&self) -> usize {
        self.names.len()
    }

    pub fn is_empty(&self) -> bool {
        self.names.is_empty()
    }

    pub fn ids(&self) -> BTreeSet<CategoryId> {
        self.names.keys().copied().collect()
    }

    pub fn name(&self, id: CategoryId) -> Option<&str> {
        self.names.get(&id).map(String::as_str)
    }

    pub fn id_of(&self, name: &str) -> Option<CategoryId> {
        self.names
            .iter()
            .find(|(_, other)| *other == name)
            .map(|(&id, _)| id)
    }
}

/// A fold as written in a definition file: a name and its novel category names.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FoldSpec {
    pub name: String,
    pub novel: Vec<String>,
}

impl FoldSpec {
    /// The four OD-25 folds of the VizWiz few-shot protocol.
    pub fn od25() -> Vec<Self> {
        OD25_NOVEL_CATEGORIES
            .iter()
            .map(|(name, novel)| FoldSpec {
                name: (*name).to_owned(),
                novel: novel.iter().map(|&name| name.to_owned()).collect(),
            })
            .collect()
    }

    /// Loads fold definitions from a JSON5 object mapping fold names to
    /// novel category names. Folds keep the file order.
    pub fn load_file(path: impl AsRef<Path>) -> Result<Vec<Self>, FoldError> {
        let path = path.as_ref();
        let text = fs::read_to_string(path).map_err(|err| FoldError::io(path, err))?;
        let FoldTable(specs) = json5::from_str(&text)
            .map_err(|err| FoldError::parse(format_args!("'{}'", path.display()), err))?;
        Ok(specs)
    }

    /// Resolves category names against the universe.
    ///
    /// Base categories are the universe minus the novel ones.
    pub fn resolve(&self, universe: &CategoryUniverse) -> Result<Fold, FoldError> {
        let invalid = |reason: String| FoldError::InvalidFold {
            fold: self.name.clone(),
            reason,
        };

        let mut novel = BTreeSet::new();
        for name in &self.novel {
            let id = universe
                .id_of(name)
                .ok_or_else(|| invalid(format!("unknown category '{}'", name)))?;
            if !novel.insert(id) {
                return Err(invalid(format!("category '{}' is listed twice", name)));
            }
        }

        if novel.is_empty() {
            return Err(invalid("no novel categories".to_owned()));
        }

        let base: BTreeSet<_> = universe.ids().difference(&novel).copied().collect();
        let fold = Fold {
            name: self.name.clone(),
            base,
            novel,
        };
        fold.check_partition(universe)?;

        Ok(fold)
    }
}

/// Fold definitions in file order. Repeated fold names are rejected.
struct FoldTable(Vec<FoldSpec>);

impl<'de> Deserialize<'de> for FoldTable {
    fn deserialize<D>(deserializer: D) -> Result<Self, D::Error>
    where
        D: Deserializer<'de>,
    {
        struct FoldTableVisitor;

        impl<'de> Visitor<'de> for FoldTableVisitor {
            type Value = FoldTable;

            fn expecting(&self, f: &mut fmt::Formatter) -> fmt::Result {
                f.write_str("a map from fold names to novel category names")
            }

            fn visit_map<A>(self, mut access: A) -> Result<Self::Value, A::Error>
            where
                A: MapAccess<'de>,
            {
                let mut names = HashSet::new();
                let mut specs = vec![];

                while let Some((name, novel)) = access.next_entry::<String, Vec<String>>()? {
                    if !names.insert(name.clone()) {
                        return Err(A::Error::custom(format!(
                            "fold '{}' is defined more than once",
                            name
                        )));
                    }
                    specs.push(FoldSpec { name, novel });
                }

                Ok(FoldTable(specs))
            }
        }

        deserializer.deserialize_map(FoldTableVisitor)
    }
}

/// A resolved fold.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Fold {
    pub name: String,
    pub base: BTreeSet<CategoryId>,
    pub novel: BTreeSet<CategoryId>,
}

impl Fold {
    /// Checks that base and novel categories are disjoint and cover the universe.
    pub fn check_partition(&self, universe: &CategoryUniverse) -> Result<(), FoldError> {
        let overlap: Vec<_> = self.base.intersection(&self.novel).copied().collect();
        if !overlap.is_empty() {
            return Err(FoldError::LeakageDetected {
                fold: self.name.clone(),
                stage: "fold definition".to_owned(),
                categories: overlap,
            });
        }

        let covered: BTreeSet<_> = self.base.union(&self.novel).copied().collect();
        let universe_ids = universe.ids();
        if covered != universe_ids {
            let missing = universe_ids.difference(&covered).collect_vec();
            let unknown = covered.difference(&universe_ids).collect_vec();
            return Err(FoldError::InvalidFold {
                fold: self.name.clone(),
                reason: format!(
                    "base and novel categories do not match the universe (missing {:?}, unknown {:?})",
                    missing, unknown
                ),
            });
        }

        Ok(())
    }

    /// Checks filtered base and novel corpora of this fold for residual
    /// category overlap.
    pub fn check_splits(&self, stage: &str, base: &Corpus, novel: &Corpus) -> Result<(), FoldError> {
        let base_used: BTreeSet<_> = base
            .category_ids()
            .union(&base.annotated_category_ids())
            .copied()
            .collect();
        let novel_used: BTreeSet<_> = novel
            .category_ids()
            .union(&novel.annotated_category_ids())
            .copied()
            .collect();

        let leaked: BTreeSet<CategoryId> = base_used
            .intersection(&novel_used)
            .chain(base_used.difference(&self.base))
            .chain(novel_used.difference(&self.novel))
            .copied()
            .collect();

        if leaked.is_empty() {
            Ok(())
        } else {
            Err(FoldError::LeakageDetected {
                fold: self.name.clone(),
                stage: stage.to_owned(),
                categories: leaked.into_iter().collect(),
            })
        }
    }
}
