//! Request payloads shared by handlers and services.
//!
//! Bodies are validated with `validator` before they reach a service; a
//! failed validation converts into a 400 through [`crate::ApiError`].

use serde::Deserialize;
use uuid::Uuid;
use validator::{Validate, ValidationError};

use crate::models::{AdStatus, Category, Location, UserLocation};

/// Description word limit for ads.
pub const MAX_DESCRIPTION_WORDS: usize = 100;
/// Longest accepted image URL.
pub const MAX_IMAGE_URL_LEN: usize = 500;

/// Location as submitted by clients. Coordinates come in pairs.
#[derive(Debug, Clone, Deserialize, Validate)]
#[validate(schema(function = "validate_coordinate_pair"))]
pub struct LocationInput {
    #[validate(length(min = 1, max = 100, message = "City is required"))]
    pub city: String,
    #[validate(length(max = 100))]
    pub state: Option<String>,
    #[validate(length(max = 12))]
    pub pincode: Option<String>,
    #[validate(range(min = -90.0, max = 90.0, message = "Latitude must be within -90..90"))]
    pub lat: Option<f64>,
    #[validate(range(min = -180.0, max = 180.0, message = "Longitude must be within -180..180"))]
    pub lng: Option<f64>,
}

impl LocationInput {
    pub fn into_location(self) -> Location {
        Location {
            city: self.city.trim().to_string(),
            state: trimmed(self.state),
            pincode: trimmed(self.pincode),
            lat: self.lat,
            lng: self.lng,
        }
    }

    pub fn into_user_location(self) -> UserLocation {
        let location = self.into_location();
        UserLocation {
            city: Some(location.city),
            state: location.state,
            pincode: location.pincode,
            lat: location.lat,
            lng: location.lng,
        }
    }
}

fn trimmed(value: Option<String>) -> Option<String> {
    value.map(|v| v.trim().to_string()).filter(|v| !v.is_empty())
}

fn validate_coordinate_pair(location: &LocationInput) -> Result<(), ValidationError> {
    if location.lat.is_some() != location.lng.is_some() {
        return Err(ValidationError::new("coordinates")
            .with_message("lat and lng must be provided together".into()));
    }
    if location.city.trim().is_empty() {
        return Err(ValidationError::new("city").with_message("City is required".into()));
    }
    Ok(())
}

fn validate_word_count(description: &str) -> Result<(), ValidationError> {
    if description.split_whitespace().count() > MAX_DESCRIPTION_WORDS {
        return Err(ValidationError::new("description_words")
            .with_message("Description must be at most 100 words".into()));
    }
    Ok(())
}

fn validate_images(images: &[String]) -> Result<(), ValidationError> {
    if images
        .iter()
        .any(|url| url.trim().is_empty() || url.len() > MAX_IMAGE_URL_LEN)
    {
        return Err(ValidationError::new("images").with_message("Invalid image URL".into()));
    }
    Ok(())
}

pub(crate) fn validate_not_blank(value: &str) -> Result<(), ValidationError> {
    if value.trim().is_empty() {
        return Err(ValidationError::new("blank").with_message("Must not be blank".into()));
    }
    Ok(())
}

fn validate_owner_status(status: &AdStatus) -> Result<(), ValidationError> {
    match status {
        AdStatus::Active | AdStatus::Inactive => Ok(()),
        AdStatus::Rejected => Err(ValidationError::new("status")
            .with_message("Status must be active or inactive".into())),
    }
}

fn validate_subcategory(req: &CreateAdRequest) -> Result<(), ValidationError> {
    match req.subcategory.as_deref() {
        Some(sub) if !req.category.allows_subcategory(sub) => Err(ValidationError::new(
            "subcategory",
        )
        .with_message(format!("Subcategory {sub} is not valid for {}", req.category).into())),
        _ => Ok(()),
    }
}

/// Body of `POST /api/ads`.
#[derive(Debug, Deserialize, Validate)]
#[validate(schema(function = "validate_subcategory"))]
pub struct CreateAdRequest {
    pub category: Category,
    pub subcategory: Option<String>,
    #[validate(
        length(min = 1, max = 60, message = "Title must be 1-60 characters"),
        custom(function = "validate_not_blank")
    )]
    pub title: String,
    #[validate(
        length(min = 1, max = 2000, message = "Description must be 1-2000 characters"),
        custom(function = "validate_word_count")
    )]
    pub description: String,
    #[validate(range(min = 0.0, max = 10000000.0, message = "Price must be a non-negative amount"))]
    pub price_per_day: f64,
    #[validate(
        length(min = 1, max = 5, message = "Between 1 and 5 images are required"),
        custom(function = "validate_images")
    )]
    pub images: Vec<String>,
    #[validate(nested)]
    pub location: LocationInput,
    #[validate(length(min = 5, max = 20, message = "Contact number must be 5-20 characters"))]
    pub contact_number: String,
}

/// Body of `PUT /api/ads/{id}`. Absent fields are left unchanged.
#[derive(Debug, Default, Deserialize, Validate)]
pub struct UpdateAdRequest {
    #[validate(
        length(min = 1, max = 60, message = "Title must be 1-60 characters"),
        custom(function = "validate_not_blank")
    )]
    pub title: Option<String>,
    #[validate(
        length(min = 1, max = 2000, message = "Description must be 1-2000 characters"),
        custom(function = "validate_word_count")
    )]
    pub description: Option<String>,
    #[validate(range(min = 0.0, max = 10000000.0, message = "Price must be a non-negative amount"))]
    pub price_per_day: Option<f64>,
    #[validate(
        length(min = 1, max = 5, message = "Between 1 and 5 images are required"),
        custom(function = "validate_images")
    )]
    pub images: Option<Vec<String>>,
    #[validate(nested)]
    pub location: Option<LocationInput>,
    #[validate(length(min = 5, max = 20, message = "Contact number must be 5-20 characters"))]
    pub contact_number: Option<String>,
    #[validate(custom(function = "validate_owner_status"))]
    pub status: Option<AdStatus>,
}

/// Query string of `GET /api/ads`.
#[derive(Debug, Default, Deserialize)]
pub struct AdSearch {
    pub category: Option<String>,
    pub subcategory: Option<String>,
    pub city: Option<String>,
    pub search: Option<String>,
    pub min_price: Option<f64>,
    pub max_price: Option<f64>,
    pub lat: Option<f64>,
    pub lng: Option<f64>,
    /// Kilometres
    pub max_distance: Option<f64>,
    pub page: Option<i64>,
    pub limit: Option<i64>,
    pub sort: Option<String>,
}

/// Body of `POST /api/messages`.
#[derive(Debug, Deserialize, Validate)]
pub struct SendMessageRequest {
    pub ad_id: Uuid,
    pub receiver_id: Uuid,
    #[validate(
        length(min = 1, max = 2000, message = "Message must be 1-2000 characters"),
        custom(function = "validate_not_blank")
    )]
    pub message: String,
    #[validate(length(max = 500))]
    pub image: Option<String>,
    /// Client-generated id that makes retries idempotent
    #[validate(length(min = 1, max = 64))]
    pub client_message_id: Option<String>,
}

/// Body of `PUT /api/user/profile`. Absent fields are left unchanged.
#[derive(Debug, Default, Deserialize, Validate)]
pub struct UpdateProfileRequest {
    #[validate(
        length(min = 1, max = 80, message = "Name must be 1-80 characters"),
        custom(function = "validate_not_blank")
    )]
    pub name: Option<String>,
    #[validate(length(min = 5, max = 20, message = "Phone must be 5-20 characters"))]
    pub phone: Option<String>,
    #[validate(length(max = 500))]
    pub picture: Option<String>,
    #[validate(nested)]
    pub location: Option<LocationInput>,
}

impl UpdateProfileRequest {
    pub fn is_empty(&self) -> bool {
        self.name.is_none() && self.phone.is_none() && self.picture.is_none() && self.location.is_none()
    }
}

/// Body of `POST /api/user/transfer-points`. Amount rules live in
/// [`crate::services::validate_transfer`].
#[derive(Debug, Deserialize, Validate)]
pub struct TransferPointsRequest {
    pub to_user_id: Uuid,
    pub amount: i64,
    #[validate(length(max = 200))]
    pub note: Option<String>,
}

/// Body of `POST /api/admin/users/{id}/points`.
#[derive(Debug, Deserialize, Validate)]
pub struct GrantPointsRequest {
    pub amount: i64,
    #[validate(length(max = 200))]
    pub note: Option<String>,
}

/// Body of `PUT /api/admin/ads/{id}/status`. Admins may also reject.
#[derive(Debug, Deserialize)]
pub struct AdStatusRequest {
    pub status: AdStatus,
}
