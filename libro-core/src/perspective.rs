//! Doctrinal perspectives and the perspective catalog.

use crate::{ConfigError, RequestError};
use serde::{Deserialize, Serialize};
use std::collections::btree_set;
use std::collections::{BTreeMap, BTreeSet};
use std::fmt;
use std::path::Path;
use std::str::FromStr;

// ============================================================================
// PERSPECTIVE ID
// ============================================================================

/// Identifier of a doctrinal perspective, e.g. `eastern_orthodox`.
///
/// Always lowercase snake case. Parsing folds case and treats spaces and
/// hyphens as underscores, so `"Eastern Orthodox"` and `"eastern-orthodox"`
/// name the same perspective.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct PerspectiveId(String);

impl PerspectiveId {
    pub fn parse(value: &str) -> Result<Self, RequestError> {
        let mut normalized = String::with_capacity(value.len());
        for ch in value.trim().chars() {
            match ch {
                'a'..='z' | '0'..='9' | '_' => normalized.push(ch),
                'A'..='Z' => normalized.push(ch.to_ascii_lowercase()),
                ' ' | '-' => normalized.push('_'),
                _ => {
                    return Err(RequestError::InvalidPerspectiveId {
                        value: value.to_string(),
                        reason: format!("unexpected character {:?}", ch),
                    })
                }
            }
        }
        if normalized.is_empty() {
            return Err(RequestError::InvalidPerspectiveId {
                value: value.to_string(),
                reason: "empty".to_string(),
            });
        }
        Ok(Self(normalized))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Human-readable title, `eastern_orthodox` -> `Eastern Orthodox`.
    pub fn title(&self) -> String {
        self.0
            .split('_')
            .filter(|w| !w.is_empty())
            .map(|word| {
                let mut chars = word.chars();
                match chars.next() {
                    Some(first) => first.to_ascii_uppercase().to_string() + chars.as_str(),
                    None => String::new(),
                }
            })
            .collect::<Vec<_>>()
            .join(" ")
    }
}

impl fmt::Display for PerspectiveId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl FromStr for PerspectiveId {
    type Err = RequestError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::parse(s)
    }
}

impl TryFrom<String> for PerspectiveId {
    type Error = RequestError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        Self::parse(&value)
    }
}

impl From<PerspectiveId> for String {
    fn from(id: PerspectiveId) -> Self {
        id.0
    }
}

// ============================================================================
// PERSPECTIVE SET
// ============================================================================

/// Canonically ordered set of perspectives.
///
/// Iteration order is the sort order of the ids, so two sets built from the
/// same perspectives in any order compare, hash and serialize identically.
#[derive(Debug, Clone, Default, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct PerspectiveSet(BTreeSet<PerspectiveId>);

impl PerspectiveSet {
    pub fn new() -> Self {
        Self(BTreeSet::new())
    }

    pub fn insert(&mut self, id: PerspectiveId) -> bool {
        self.0.insert(id)
    }

    pub fn contains(&self, id: &PerspectiveId) -> bool {
        self.0.contains(id)
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn iter(&self) -> btree_set::Iter<'_, PerspectiveId> {
        self.0.iter()
    }

    pub fn is_subset(&self, other: &PerspectiveSet) -> bool {
        self.0.is_subset(&other.0)
    }

    pub fn difference(&self, other: &PerspectiveSet) -> PerspectiveSet {
        Self(self.0.difference(&other.0).cloned().collect())
    }

    pub fn intersection(&self, other: &PerspectiveSet) -> PerspectiveSet {
        Self(self.0.intersection(&other.0).cloned().collect())
    }

    pub fn union(&self, other: &PerspectiveSet) -> PerspectiveSet {
        Self(self.0.union(&other.0).cloned().collect())
    }

    pub fn overlap(&self, other: &PerspectiveSet) -> usize {
        self.0.intersection(&other.0).count()
    }

    pub fn is_disjoint(&self, other: &PerspectiveSet) -> bool {
        self.0.is_disjoint(&other.0)
    }

    /// Comma separated ids in canonical order.
    pub fn joined(&self) -> String {
        self.0
            .iter()
            .map(PerspectiveId::as_str)
            .collect::<Vec<_>>()
            .join(",")
    }
}

impl FromIterator<PerspectiveId> for PerspectiveSet {
    fn from_iter<I: IntoIterator<Item = PerspectiveId>>(iter: I) -> Self {
        Self(iter.into_iter().collect())
    }
}

impl IntoIterator for PerspectiveSet {
    type Item = PerspectiveId;
    type IntoIter = btree_set::IntoIter<PerspectiveId>;

    fn into_iter(self) -> Self::IntoIter {
        self.0.into_iter()
    }
}

impl<'a> IntoIterator for &'a PerspectiveSet {
    type Item = &'a PerspectiveId;
    type IntoIter = btree_set::Iter<'a, PerspectiveId>;

    fn into_iter(self) -> Self::IntoIter {
        self.0.iter()
    }
}

impl fmt::Display for PerspectiveSet {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{{{}}}", self.joined())
    }
}

// ============================================================================
// PERSPECTIVE CATALOG
// ============================================================================

/// Prompt configuration for one perspective. Opaque to the engine.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PerspectiveProfile {
    pub id: PerspectiveId,
    pub display_name: String,
    pub instructions: String,
}

/// Read-only mapping of perspective id to prompt configuration.
///
/// Loaded once at startup and shared behind an `Arc`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PerspectiveCatalog {
    profiles: BTreeMap<PerspectiveId, PerspectiveProfile>,
}

const BUILTIN_PERSPECTIVES: &[(&str, &str)] = &[
    (
        "catholic",
        "Draw on Sacred Tradition read alongside Scripture, the teaching office of the \
         Church, sacramental grace, the communion of saints and Catholic social teaching.",
    ),
    (
        "eastern_orthodox",
        "Draw on theosis as the goal of the Christian life, the Church Fathers, liturgical \
         and mystical tradition, the Trinity and the divine energies, and sacramental life.",
    ),
    (
        "oriental_orthodox",
        "Draw on Miaphysite Christology, the ancient liturgies, the patristic heritage of \
         the early Church and monastic spirituality.",
    ),
    (
        "church_of_the_east",
        "Draw on Dyophysite Christology, the Syriac liturgical and theological tradition, \
         the East Syriac Rite and the Church's history across Mesopotamia and Asia.",
    ),
    (
        "baptist",
        "Draw on believer's baptism by immersion, congregational governance, soul liberty, \
         the authority of Scripture and the priesthood of all believers.",
    ),
    (
        "anglican",
        "Draw on the via media, the Book of Common Prayer, episcopal polity and apostolic \
         succession, and Scripture read with tradition and reason.",
    ),
    (
        "methodist",
        "Draw on prevenient grace, personal holiness and sanctification, the Wesleyan \
         quadrilateral and works of mercy and piety.",
    ),
    (
        "pentecostal",
        "Draw on baptism in the Holy Spirit, the gifts of the Spirit, divine healing, \
         evangelism and the expectation of Christ's return.",
    ),
    (
        "lutheran",
        "Draw on justification by faith alone, Scripture alone, grace alone, the \
         distinction of Law and Gospel and the sacraments as means of grace.",
    ),
    (
        "presbyterian",
        "Draw on the Westminster Standards, government by elders, the sovereignty of God \
         in salvation and covenant theology.",
    ),
    (
        "puritan",
        "Draw on covenant theology, experiential piety, the regulative principle of \
         worship, holy living and the centrality of preaching.",
    ),
    (
        "dutch_reformed",
        "Draw on the Three Forms of Unity, covenant theology, God's sovereignty over every \
         sphere of life and the cultural mandate.",
    ),
    (
        "moravian",
        "Draw on heartfelt devotion to Christ, unity of the Spirit, simple worship, \
         missionary zeal and life in community.",
    ),
];

impl PerspectiveCatalog {
    /// Catalog of the thirteen built-in traditions.
    pub fn builtin() -> Self {
        let profiles = BUILTIN_PERSPECTIVES
            .iter()
            .filter_map(|(id, instructions)| {
                let id = PerspectiveId::parse(id).ok()?;
                Some((
                    id.clone(),
                    PerspectiveProfile {
                        display_name: id.title(),
                        id,
                        instructions: (*instructions).to_string(),
                    },
                ))
            })
            .collect();
        Self { profiles }
    }

    pub fn from_profiles(profiles: Vec<PerspectiveProfile>) -> Result<Self, ConfigError> {
        if profiles.is_empty() {
            return Err(ConfigError::InvalidValue {
                field: "perspectives".to_string(),
                value: "[]".to_string(),
                reason: "catalog must contain at least one perspective".to_string(),
            });
        }
        let mut map = BTreeMap::new();
        for profile in profiles {
            if map.contains_key(&profile.id) {
                return Err(ConfigError::InvalidValue {
                    field: "perspectives".to_string(),
                    value: profile.id.to_string(),
                    reason: "duplicate perspective id".to_string(),
                });
            }
            map.insert(profile.id.clone(), profile);
        }
        Ok(Self { profiles: map })
    }

    /// Parse a JSON array of profiles.
    pub fn from_json_str(json: &str) -> Result<Self, ConfigError> {
        let profiles: Vec<PerspectiveProfile> =
            serde_json::from_str(json).map_err(|e| ConfigError::CatalogLoad {
                path: "<inline>".to_string(),
                reason: e.to_string(),
            })?;
        Self::from_profiles(profiles)
    }

    pub fn load<P: AsRef<Path>>(path: P) -> Result<Self, ConfigError> {
        let path = path.as_ref();
        let json = std::fs::read_to_string(path).map_err(|e| ConfigError::CatalogLoad {
            path: path.display().to_string(),
            reason: e.to_string(),
        })?;
        Self::from_json_str(&json).map_err(|e| match e {
            ConfigError::CatalogLoad { reason, .. } => ConfigError::CatalogLoad {
                path: path.display().to_string(),
                reason,
            },
            other => other,
        })
    }

    pub fn get(&self, id: &PerspectiveId) -> Option<&PerspectiveProfile> {
        self.profiles.get(id)
    }

    pub fn contains(&self, id: &PerspectiveId) -> bool {
        self.profiles.contains_key(id)
    }

    /// Profiles for every member of `set`, in canonical order.
    pub fn profiles_for(&self, set: &PerspectiveSet) -> Result<Vec<PerspectiveProfile>, RequestError> {
        set.iter()
            .map(|id| {
                self.get(id)
                    .cloned()
                    .ok_or_else(|| RequestError::UnknownPerspective {
                        perspective: id.to_string(),
                    })
            })
            .collect()
    }

    pub fn ids(&self) -> impl Iterator<Item = &PerspectiveId> {
        self.profiles.keys()
    }

    pub fn len(&self) -> usize {
        self.profiles.len()
    }

    pub fn is_empty(&self) -> bool {
        self.profiles.is_empty()
    }
}

impl Default for PerspectiveCatalog {
    fn default() -> Self {
        Self::builtin()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn id(s: &str) -> PerspectiveId {
        s.parse().unwrap()
    }

    #[test]
    fn test_parse_normalizes_case_and_separators() {
        assert_eq!(id("Eastern Orthodox"), id("eastern_orthodox"));
        assert_eq!(id(" eastern-orthodox "), id("eastern_orthodox"));
        assert_eq!(id("CATHOLIC").as_str(), "catholic");
    }

    #[test]
    fn test_parse_rejects_garbage() {
        assert!(PerspectiveId::parse("").is_err());
        assert!(PerspectiveId::parse("   ").is_err());
        assert!(PerspectiveId::parse("cath/olic").is_err());
    }

    #[test]
    fn test_title() {
        assert_eq!(id("church_of_the_east").title(), "Church Of The East");
        assert_eq!(id("baptist").title(), "Baptist");
    }

    #[test]
    fn test_set_is_order_independent() {
        let a: PerspectiveSet = [id("lutheran"), id("catholic")].into_iter().collect();
        let b: PerspectiveSet = [id("catholic"), id("lutheran")].into_iter().collect();
        assert_eq!(a, b);
        assert_eq!(a.joined(), "catholic,lutheran");
        assert_eq!(
            serde_json::to_string(&a).unwrap(),
            serde_json::to_string(&b).unwrap()
        );
    }

    #[test]
    fn test_set_algebra() {
        let cached: PerspectiveSet = [id("catholic"), id("lutheran")].into_iter().collect();
        let wanted: PerspectiveSet = [id("catholic"), id("lutheran"), id("baptist")]
            .into_iter()
            .collect();
        let delta = wanted.difference(&cached);
        assert_eq!(delta.joined(), "baptist");
        assert_eq!(wanted.overlap(&cached), 2);
        assert!(cached.is_subset(&wanted));
        assert_eq!(cached.union(&delta), wanted);
    }

    #[test]
    fn test_builtin_catalog() {
        let catalog = PerspectiveCatalog::builtin();
        assert_eq!(catalog.len(), 13);
        let profile = catalog.get(&id("dutch_reformed")).unwrap();
        assert_eq!(profile.display_name, "Dutch Reformed");
        assert!(!profile.instructions.is_empty());
        assert!(!catalog.contains(&id("gnostic")));
    }

    #[test]
    fn test_profiles_for_unknown() {
        let catalog = PerspectiveCatalog::builtin();
        let set: PerspectiveSet = [id("catholic"), id("gnostic")].into_iter().collect();
        let err = catalog.profiles_for(&set).unwrap_err();
        assert_eq!(
            err,
            RequestError::UnknownPerspective {
                perspective: "gnostic".to_string()
            }
        );
    }

    #[test]
    fn test_catalog_from_json() {
        let json = r#"[
            {"id": "catholic", "display_name": "Catholic", "instructions": "Tradition."},
            {"id": "Quaker", "display_name": "Religious Society of Friends", "instructions": "Inner light."}
        ]"#;
        let catalog = PerspectiveCatalog::from_json_str(json).unwrap();
        assert_eq!(catalog.len(), 2);
        assert!(catalog.contains(&id("quaker")));
    }

    #[test]
    fn test_catalog_rejects_empty_and_duplicates() {
        assert!(PerspectiveCatalog::from_json_str("[]").is_err());
        let json = r#"[
            {"id": "catholic", "display_name": "A", "instructions": "a"},
            {"id": "CATHOLIC", "display_name": "B", "instructions": "b"}
        ]"#;
        assert!(matches!(
            PerspectiveCatalog::from_json_str(json),
            Err(ConfigError::InvalidValue { .. })
        ));
    }

    #[test]
    fn test_catalog_load_reports_path() {
        let dir = tempfile::TempDir::new().unwrap();
        let path = dir.path().join("perspectives.json");
        std::fs::write(&path, "not json").unwrap();
        match PerspectiveCatalog::load(&path) {
            Err(ConfigError::CatalogLoad { path: reported, .. }) => {
                assert!(reported.ends_with("perspectives.json"))
            }
            other => panic!("unexpected: {:?}", other),
        }
    }
}
