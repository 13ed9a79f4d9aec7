//! Common imports from external crates.

pub use indexmap::{IndexMap, IndexSet};
pub use itertools::Itertools as _;
pub use log::{info, warn};
pub use rand::{prelude::*, rngs::StdRng, seq::SliceRandom};
pub use serde::{
    de::{Error as DeserializeError, MapAccess, Visitor},
    ser::{SerializeStruct as _, Serializer},
    Deserialize, Deserializer, Serialize,
};
pub use serde_json::Value;
pub use std::{
    collections::{BTreeMap, BTreeSet, HashMap, HashSet},
    fmt,
    fs::{self, File},
    io::{self, BufReader, BufWriter, Read as _, Seek as _, SeekFrom, Write as _},
    path::{Path, PathBuf},
    sync::Arc,
};
