//! Listing and profile form checks.
//!
//! Validation never stops at the first problem: every failing rule adds a
//! human-readable message so a form can show them all at once.

use serde::{Deserialize, Serialize};
use std::fmt;

use crate::config::ValidationLimits;
use crate::model::{LatLon, ListingKind};

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ValidationErrors(Vec<String>);

impl ValidationErrors {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push(&mut self, message: impl Into<String>) {
        self.0.push(message.into());
    }

    pub fn messages(&self) -> &[String] {
        &self.0
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn into_result(self) -> Result<(), Self> {
        if self.0.is_empty() {
            Ok(())
        } else {
            Err(self)
        }
    }
}

impl fmt::Display for ValidationErrors {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0.join("\n"))
    }
}

impl std::error::Error for ValidationErrors {}

/// Collects rule failures for one form.
#[derive(Debug, Default)]
pub struct Checker {
    errors: ValidationErrors,
}

impl Checker {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn required(&mut self, label: &str, value: &str) -> &mut Self {
        if value.trim().is_empty() {
            self.errors.push(format!("{label} is required"));
        }
        self
    }

    pub fn max_len(&mut self, label: &str, value: &str, max: usize) -> &mut Self {
        let len = value.trim().chars().count();
        if len > max {
            self.errors
                .push(format!("{label} must be at most {max} characters"));
        }
        self
    }

    /// Only applied to non-empty values; pair with `required` for mandatory fields.
    pub fn min_len(&mut self, label: &str, value: &str, min: usize) -> &mut Self {
        let len = value.trim().chars().count();
        if len > 0 && len < min {
            self.errors
                .push(format!("{label} must be at least {min} characters"));
        }
        self
    }

    pub fn positive(&mut self, label: &str, value: u64) -> &mut Self {
        if value == 0 {
            self.errors.push(format!("{label} must be greater than zero"));
        }
        self
    }

    pub fn phone(&mut self, label: &str, value: &str) -> &mut Self {
        if !value.trim().is_empty() && normalize_phone(value).is_none() {
            self.errors.push(format!(
                "{label} must be a Botswana number, e.g. +267 71 234 567"
            ));
        }
        self
    }

    pub fn url(&mut self, label: &str, value: Option<&str>) -> &mut Self {
        if let Some(raw) = value {
            let ok = url::Url::parse(raw)
                .map(|u| matches!(u.scheme(), "http" | "https") && u.host_str().is_some())
                .unwrap_or(false);
            if !ok {
                self.errors.push(format!("{label} must be a web address"));
            }
        }
        self
    }

    pub fn coordinates(&mut self, label: &str, value: Option<(f64, f64)>) -> &mut Self {
        if let Some((lat, lon)) = value {
            if LatLon::new(lat, lon).is_none() {
                self.errors.push(format!("{label} is not a valid location"));
            }
        }
        self
    }

    pub fn finish(&mut self) -> Result<(), ValidationErrors> {
        std::mem::take(&mut self.errors).into_result()
    }
}

/// Normalizes a Botswana phone number to `+267XXXXXXXX`.
///
/// Accepts 7-digit landlines and 8-digit mobiles (starting with 7), with or
/// without the country code, spaces or dashes.
pub fn normalize_phone(raw: &str) -> Option<String> {
    let compact: String = raw
        .chars()
        .filter(|c| !c.is_whitespace() && *c != '-')
        .collect();
    let local = compact
        .strip_prefix("+267")
        .or_else(|| compact.strip_prefix("00267"))
        .unwrap_or(&compact);

    if !local.chars().all(|c| c.is_ascii_digit()) {
        return None;
    }
    let valid = match local.len() {
        8 => local.starts_with('7'),
        7 => !local.starts_with('0'),
        _ => false,
    };
    valid.then(|| format!("+267{local}"))
}

pub trait Validate {
    fn validate(&self, limits: &ValidationLimits) -> Result<(), ValidationErrors>;
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct EquipmentForm {
    pub name: String,
    pub description: String,
    pub category: String,
    pub listing: Option<ListingKind>,
    pub price_thebe: u64,
    pub location: String,
    pub coordinates: Option<(f64, f64)>,
}

impl Validate for EquipmentForm {
    fn validate(&self, limits: &ValidationLimits) -> Result<(), ValidationErrors> {
        let mut c = Checker::new();
        c.required("Name", &self.name)
            .max_len("Name", &self.name, limits.max_title_len)
            .required("Description", &self.description)
            .max_len("Description", &self.description, limits.max_description_len)
            .required("Category", &self.category)
            .positive("Price", self.price_thebe)
            .required("Location", &self.location)
            .coordinates("Map pin", self.coordinates);
        if self.listing.is_none() {
            c.errors.push("Choose whether the equipment is for sale or rent");
        }
        c.finish()
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct SeedForm {
    pub name: String,
    pub variety: String,
    pub description: String,
    pub quantity_kg: u32,
    pub price_thebe: u64,
    pub location: String,
}

impl Validate for SeedForm {
    fn validate(&self, limits: &ValidationLimits) -> Result<(), ValidationErrors> {
        Checker::new()
            .required("Name", &self.name)
            .max_len("Name", &self.name, limits.max_title_len)
            .required("Variety", &self.variety)
            .max_len("Description", &self.description, limits.max_description_len)
            .positive("Quantity", u64::from(self.quantity_kg))
            .positive("Price", self.price_thebe)
            .required("Location", &self.location)
            .finish()
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct LandForm {
    pub title: String,
    pub description: String,
    pub size_centi_ha: u32,
    pub listing: Option<ListingKind>,
    pub price_thebe: u64,
    pub location: String,
    pub coordinates: Option<(f64, f64)>,
}

impl Validate for LandForm {
    fn validate(&self, limits: &ValidationLimits) -> Result<(), ValidationErrors> {
        let mut c = Checker::new();
        c.required("Title", &self.title)
            .max_len("Title", &self.title, limits.max_title_len)
            .max_len("Description", &self.description, limits.max_description_len)
            .positive("Size", u64::from(self.size_centi_ha))
            .positive("Price", self.price_thebe)
            .required("Location", &self.location)
            .coordinates("Map pin", self.coordinates);
        if self.listing.is_none() {
            c.errors.push("Choose whether the land is for sale or lease");
        }
        c.finish()
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct GroupForm {
    pub name: String,
    pub description: String,
    pub location: String,
}

impl Validate for GroupForm {
    fn validate(&self, limits: &ValidationLimits) -> Result<(), ValidationErrors> {
        Checker::new()
            .required("Group name", &self.name)
            .min_len("Group name", &self.name, 3)
            .max_len("Group name", &self.name, limits.max_title_len)
            .required("Description", &self.description)
            .max_len("Description", &self.description, limits.max_description_len)
            .required("Location", &self.location)
            .finish()
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ForumPostForm {
    pub title: String,
    pub content: String,
    pub category: String,
}

impl Validate for ForumPostForm {
    fn validate(&self, limits: &ValidationLimits) -> Result<(), ValidationErrors> {
        Checker::new()
            .required("Title", &self.title)
            .min_len("Title", &self.title, 5)
            .max_len("Title", &self.title, limits.max_title_len)
            .required("Post", &self.content)
            .min_len("Post", &self.content, limits.min_post_len)
            .max_len("Post", &self.content, limits.max_post_len)
            .required("Category", &self.category)
            .finish()
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ProfileForm {
    pub full_name: String,
    pub phone: String,
    pub avatar_url: Option<String>,
}

impl Validate for ProfileForm {
    fn validate(&self, limits: &ValidationLimits) -> Result<(), ValidationErrors> {
        Checker::new()
            .required("Full name", &self.full_name)
            .min_len("Full name", &self.full_name, 2)
            .max_len("Full name", &self.full_name, limits.max_title_len)
            .required("Phone number", &self.phone)
            .phone("Phone number", &self.phone)
            .url("Profile photo", self.avatar_url.as_deref())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn limits() -> ValidationLimits {
        ValidationLimits::default()
    }

    #[test]
    fn empty_equipment_form_lists_every_problem() {
        let errors = EquipmentForm::default().validate(&limits()).unwrap_err();
        let messages = errors.messages();
        assert!(messages.contains(&"Name is required".to_string()));
        assert!(messages.contains(&"Description is required".to_string()));
        assert!(messages.contains(&"Category is required".to_string()));
        assert!(messages.contains(&"Price must be greater than zero".to_string()));
        assert!(messages.contains(&"Location is required".to_string()));
        assert_eq!(errors.len(), 6);
    }

    #[test]
    fn valid_equipment_form_passes() {
        let form = EquipmentForm {
            name: "Massey Ferguson 165".into(),
            description: "Runs well, new tyres".into(),
            category: "tractor".into(),
            listing: Some(ListingKind::Sale),
            price_thebe: 8_500_000,
            location: "Lobatse".into(),
            coordinates: Some((-25.22, 25.68)),
        };
        assert!(form.validate(&limits()).is_ok());
    }

    #[test]
    fn title_length_counts_characters_not_bytes() {
        let limits = ValidationLimits {
            max_title_len: 4,
            ..ValidationLimits::default()
        };
        let form = GroupForm {
            name: "ñañá".into(),
            description: "d".into(),
            location: "Gaborone".into(),
        };
        assert!(form.validate(&limits).is_ok());
    }

    #[test]
    fn short_forum_post_rejected() {
        let form = ForumPostForm {
            title: "Help".into(),
            content: "?".into(),
            category: "pests".into(),
        };
        let errors = form.validate(&limits()).unwrap_err();
        assert_eq!(errors.len(), 2);
    }

    #[test]
    fn phone_normalization() {
        assert_eq!(normalize_phone("+267 71 234 567").as_deref(), Some("+26771234567"));
        assert_eq!(normalize_phone("71-234-567").as_deref(), Some("+26771234567"));
        assert_eq!(normalize_phone("00267 3951234").as_deref(), Some("+2673951234"));
        assert!(normalize_phone("61234567").is_none());
        assert!(normalize_phone("+27 82 123 4567").is_none());
        assert!(normalize_phone("7123abcd").is_none());
    }

    #[test]
    fn profile_rejects_bad_phone_and_avatar() {
        let form = ProfileForm {
            full_name: "Neo Kgosi".into(),
            phone: "12345".into(),
            avatar_url: Some("javascript:alert(1)".into()),
        };
        let errors = form.validate(&limits()).unwrap_err();
        assert_eq!(errors.len(), 2);
    }

    #[test]
    fn errors_display_one_per_line() {
        let mut errors = ValidationErrors::new();
        errors.push("a");
        errors.push("b");
        assert_eq!(errors.to_string(), "a\nb");
    }
}
