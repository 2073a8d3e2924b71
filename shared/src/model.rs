use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use std::fmt;

// --- Typed IDs ---

macro_rules! typed_id {
    ($name:ident) => {
        #[derive(Serialize, Deserialize, Clone, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
        #[serde(transparent)]
        pub struct $name(String);

        impl $name {
            pub fn new(s: impl Into<String>) -> Self {
                Self(s.into())
            }
            pub fn as_str(&self) -> &str {
                &self.0
            }
        }

        impl fmt::Display for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                f.write_str(&self.0)
            }
        }

        impl From<&str> for $name {
            fn from(s: &str) -> Self {
                Self(s.to_owned())
            }
        }
    };
}

typed_id!(RecordId);
typed_id!(UserId);

/// Explicit timestamp unit.
#[derive(Copy, Clone, Debug, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct UnixTimeMs(pub u64);

impl UnixTimeMs {
    #[must_use]
    pub fn now() -> Self {
        Self(
            std::time::SystemTime::now()
                .duration_since(std::time::UNIX_EPOCH)
                .map(|d| d.as_millis() as u64)
                .unwrap_or(0),
        )
    }

    #[must_use]
    pub const fn as_millis(self) -> u64 {
        self.0
    }
}

/// Validated lat/lon
#[derive(Copy, Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct LatLon {
    pub lat: f64,
    pub lon: f64,
}

impl LatLon {
    pub fn new(lat: f64, lon: f64) -> Option<Self> {
        if !lat.is_finite() || !lon.is_finite() {
            return None;
        }
        if !(-90.0..=90.0).contains(&lat) {
            return None;
        }
        if !(-180.0..=180.0).contains(&lon) {
            return None;
        }
        Some(Self { lat, lon })
    }
}

/// Price in thebe (1 Pula = 100 thebe). Avoids float money.
#[derive(Copy, Clone, Debug, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct PriceBwp(pub u64);

impl PriceBwp {
    #[must_use]
    pub const fn from_pula(pula: u64) -> Self {
        Self(pula.saturating_mul(100))
    }

    #[must_use]
    pub const fn thebe(self) -> u64 {
        self.0
    }
}

impl fmt::Display for PriceBwp {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "P{}.{:02}", self.0 / 100, self.0 % 100)
    }
}

// --- Collections ---

#[derive(Copy, Clone, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Collection {
    Equipment,
    Seeds,
    Land,
    Groups,
    ForumPosts,
}

impl Collection {
    /// Backend table name.
    #[must_use]
    pub const fn table(self) -> &'static str {
        match self {
            Self::Equipment => "equipment",
            Self::Seeds => "seeds",
            Self::Land => "land",
            Self::Groups => "groups",
            Self::ForumPosts => "forum_posts",
        }
    }
}

impl fmt::Display for Collection {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.table())
    }
}

/// Equality filters passed through to the backend untouched.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct RecordFilter {
    pub conditions: Vec<(String, String)>,
}

impl RecordFilter {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    #[must_use]
    pub fn field(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.conditions.push((name.into(), value.into()));
        self
    }

    #[must_use]
    pub fn status(self, status: impl Into<String>) -> Self {
        self.field("status", status)
    }

    #[must_use]
    pub fn location(self, location: impl Into<String>) -> Self {
        self.field("location", location)
    }

    #[must_use]
    pub fn owner(self, owner: &UserId) -> Self {
        self.field("owner_id", owner.as_str())
    }

    pub fn is_empty(&self) -> bool {
        self.conditions.is_empty()
    }

    pub fn get(&self, name: &str) -> Option<&str> {
        self.conditions
            .iter()
            .find(|(n, _)| n == name)
            .map(|(_, v)| v.as_str())
    }
}

// --- Records ---

/// Domain payload carried by a [`Record`].
pub trait Payload:
    Clone + fmt::Debug + PartialEq + Serialize + DeserializeOwned + Send + Sync + 'static
{
    const COLLECTION: Collection;

    type Status: Clone
        + fmt::Debug
        + PartialEq
        + Serialize
        + DeserializeOwned
        + Send
        + Sync
        + 'static;

    /// Short label for lists and map popups.
    fn title(&self) -> &str;

    fn coordinates(&self) -> Option<LatLon> {
        None
    }

    fn price(&self) -> Option<PriceBwp> {
        None
    }
}

/// Shared base shape of every listable item.
pub trait RecordBase {
    fn id(&self) -> &RecordId;
    fn owner_id(&self) -> &UserId;
    fn created_at(&self) -> UnixTimeMs;
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(bound = "")]
pub struct Record<P: Payload> {
    id: RecordId,
    owner_id: UserId,
    created_at: UnixTimeMs,
    pub updated_at: UnixTimeMs,
    pub status: P::Status,
    #[serde(flatten)]
    pub payload: P,
}

impl<P: Payload> Record<P> {
    pub fn new(
        id: RecordId,
        owner_id: UserId,
        created_at: UnixTimeMs,
        status: P::Status,
        payload: P,
    ) -> Self {
        Self {
            id,
            owner_id,
            created_at,
            updated_at: created_at,
            status,
            payload,
        }
    }

    pub fn collection(&self) -> Collection {
        P::COLLECTION
    }
}

impl<P: Payload> RecordBase for Record<P> {
    fn id(&self) -> &RecordId {
        &self.id
    }
    fn owner_id(&self) -> &UserId {
        &self.owner_id
    }
    fn created_at(&self) -> UnixTimeMs {
        self.created_at
    }
}

// --- Payloads ---

#[derive(Serialize, Deserialize, Clone, Copy, Debug, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum ListingKind {
    Sale,
    Rent,
}

#[derive(Serialize, Deserialize, Clone, Copy, Debug, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum EquipmentStatus {
    Available,
    Rented,
    Sold,
}

#[derive(Serialize, Deserialize, Clone, Debug, PartialEq)]
pub struct Equipment {
    pub name: String,
    pub description: String,
    pub category: String,
    pub listing: ListingKind,
    pub price: PriceBwp,
    pub location: String,
    #[serde(default)]
    pub coordinates: Option<LatLon>,
    #[serde(default)]
    pub image_url: Option<String>,
}

impl Payload for Equipment {
    const COLLECTION: Collection = Collection::Equipment;
    type Status = EquipmentStatus;

    fn title(&self) -> &str {
        &self.name
    }
    fn coordinates(&self) -> Option<LatLon> {
        self.coordinates
    }
    fn price(&self) -> Option<PriceBwp> {
        Some(self.price)
    }
}

#[derive(Serialize, Deserialize, Clone, Copy, Debug, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum SeedStatus {
    Available,
    SoldOut,
}

#[derive(Serialize, Deserialize, Clone, Debug, PartialEq)]
pub struct Seed {
    pub name: String,
    pub variety: String,
    pub description: String,
    pub quantity_kg: u32,
    pub price: PriceBwp,
    pub location: String,
    #[serde(default)]
    pub coordinates: Option<LatLon>,
    #[serde(default)]
    pub image_url: Option<String>,
}

impl Payload for Seed {
    const COLLECTION: Collection = Collection::Seeds;
    type Status = SeedStatus;

    fn title(&self) -> &str {
        &self.name
    }
    fn coordinates(&self) -> Option<LatLon> {
        self.coordinates
    }
    fn price(&self) -> Option<PriceBwp> {
        Some(self.price)
    }
}

#[derive(Serialize, Deserialize, Clone, Copy, Debug, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum LandStatus {
    Available,
    Leased,
    Sold,
}

#[derive(Serialize, Deserialize, Clone, Debug, PartialEq)]
pub struct LandPlot {
    pub title: String,
    pub description: String,
    /// Area in hundredths of a hectare.
    pub size_centi_ha: u32,
    pub listing: ListingKind,
    pub price: PriceBwp,
    pub location: String,
    #[serde(default)]
    pub coordinates: Option<LatLon>,
    #[serde(default)]
    pub image_url: Option<String>,
}

impl Payload for LandPlot {
    const COLLECTION: Collection = Collection::Land;
    type Status = LandStatus;

    fn title(&self) -> &str {
        &self.title
    }
    fn coordinates(&self) -> Option<LatLon> {
        self.coordinates
    }
    fn price(&self) -> Option<PriceBwp> {
        Some(self.price)
    }
}

#[derive(Serialize, Deserialize, Clone, Copy, Debug, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum GroupStatus {
    Open,
    Closed,
    Archived,
}

#[derive(Serialize, Deserialize, Clone, Debug, PartialEq)]
pub struct Group {
    pub name: String,
    pub description: String,
    pub location: String,
    #[serde(default)]
    pub member_count: u32,
    #[serde(default)]
    pub image_url: Option<String>,
}

impl Payload for Group {
    const COLLECTION: Collection = Collection::Groups;
    type Status = GroupStatus;

    fn title(&self) -> &str {
        &self.name
    }
}

#[derive(Serialize, Deserialize, Clone, Copy, Debug, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum ForumPostStatus {
    Published,
    Hidden,
}

#[derive(Serialize, Deserialize, Clone, Debug, PartialEq)]
pub struct ForumPost {
    pub title: String,
    pub content: String,
    pub category: String,
    #[serde(default)]
    pub image_url: Option<String>,
}

impl Payload for ForumPost {
    const COLLECTION: Collection = Collection::ForumPosts;
    type Status = ForumPostStatus;

    fn title(&self) -> &str {
        &self.title
    }
}

/// Closed set of record kinds for heterogeneous lists.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum AnyRecord {
    Equipment(Record<Equipment>),
    Seed(Record<Seed>),
    Land(Record<LandPlot>),
    Group(Record<Group>),
    ForumPost(Record<ForumPost>),
}

impl AnyRecord {
    pub fn collection(&self) -> Collection {
        match self {
            Self::Equipment(_) => Collection::Equipment,
            Self::Seed(_) => Collection::Seeds,
            Self::Land(_) => Collection::Land,
            Self::Group(_) => Collection::Groups,
            Self::ForumPost(_) => Collection::ForumPosts,
        }
    }

    fn base(&self) -> &dyn RecordBase {
        match self {
            Self::Equipment(r) => r,
            Self::Seed(r) => r,
            Self::Land(r) => r,
            Self::Group(r) => r,
            Self::ForumPost(r) => r,
        }
    }
}

impl RecordBase for AnyRecord {
    fn id(&self) -> &RecordId {
        self.base().id()
    }
    fn owner_id(&self) -> &UserId {
        self.base().owner_id()
    }
    fn created_at(&self) -> UnixTimeMs {
        self.base().created_at()
    }
}

macro_rules! any_record_from {
    ($variant:ident, $payload:ty) => {
        impl From<Record<$payload>> for AnyRecord {
            fn from(r: Record<$payload>) -> Self {
                Self::$variant(r)
            }
        }
    };
}

any_record_from!(Equipment, Equipment);
any_record_from!(Seed, Seed);
any_record_from!(Land, LandPlot);
any_record_from!(Group, Group);
any_record_from!(ForumPost, ForumPost);

// --- Derived state ---

/// Viewer-relative overlay merged onto a record after fetch.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct DerivedState {
    #[serde(default)]
    pub likes_count: u32,
    #[serde(default)]
    pub is_liked: bool,
    #[serde(default)]
    pub comments_count: u32,
}

impl DerivedState {
    /// Enforces `is_liked => likes_count >= 1`.
    #[must_use]
    pub fn normalized(mut self) -> Self {
        if self.is_liked && self.likes_count == 0 {
            self.likes_count = 1;
        }
        self
    }

    #[must_use]
    pub fn toggled(self) -> Self {
        self.with_liked(!self.is_liked)
    }

    #[must_use]
    pub fn with_liked(mut self, liked: bool) -> Self {
        if self.is_liked == liked {
            return self;
        }
        self.is_liked = liked;
        self.likes_count = if liked {
            self.likes_count.saturating_add(1)
        } else {
            self.likes_count.saturating_sub(1)
        };
        self
    }
}

// --- Session ---

#[derive(Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct CurrentUser {
    pub id: UserId,
    pub full_name: String,
    pub phone: String,
}

// Phone numbers stay out of logs.
impl fmt::Debug for CurrentUser {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CurrentUser")
            .field("id", &self.id)
            .field("full_name", &self.full_name)
            .field("phone_present", &!self.phone.is_empty())
            .finish()
    }
}
