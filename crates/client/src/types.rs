//! Wire types for the storefront API.
//!
//! Field names follow the backend's JSON (`camelCase`, `MongoDB` `_id`).
//! Payloads returned by mutation endpoints are full snapshots; their list
//! field is required so a partial response is rejected instead of silently
//! truncating the local cache.

use brickyard_core::{CategoryId, Price, ProductId, ThemeId, UserId};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// A product as it appears in the user's favorites and cart.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FavoriteProduct {
    #[serde(rename = "_id", alias = "id")]
    pub id: ProductId,
    pub name: String,
    #[serde(default)]
    pub price: Price,
    #[serde(default)]
    pub images: Vec<String>,
    #[serde(default)]
    pub stock: u32,
    #[serde(default, deserialize_with = "references::deserialize")]
    pub themes: Vec<ThemeId>,
    #[serde(default, deserialize_with = "references::deserialize")]
    pub categories: Vec<CategoryId>,
    #[serde(default)]
    pub created_at: Option<DateTime<Utc>>,
    #[serde(default)]
    pub updated_at: Option<DateTime<Utc>>,
}

impl FavoriteProduct {
    /// First image, used as the thumbnail.
    #[must_use]
    pub fn thumbnail(&self) -> Option<&str> {
        self.images.first().map(String::as_str)
    }

    #[must_use]
    pub const fn in_stock(&self) -> bool {
        self.stock > 0
    }
}

/// Favorites snapshot returned by every favorites endpoint.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FavoritesPayload {
    pub favorites: Vec<FavoriteProduct>,
    #[serde(default)]
    pub favorite_ids: Option<Vec<ProductId>>,
}

/// One cart line.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CartLine {
    pub product: FavoriteProduct,
    pub quantity: u32,
}

impl CartLine {
    #[must_use]
    pub fn line_total(&self) -> Price {
        self.product.price.times(self.quantity)
    }
}

/// Cart snapshot returned by every cart endpoint.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CartPayload {
    pub items: Vec<CartLine>,
}

/// The signed-in user.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AuthUser {
    #[serde(rename = "_id", alias = "id")]
    pub id: UserId,
    #[serde(default)]
    pub email: Option<String>,
    #[serde(default)]
    pub name: Option<String>,
    #[serde(default)]
    pub is_admin: bool,
}

/// Response of `POST /api/auth/login`.
#[derive(Debug, Clone, Deserialize)]
pub struct LoginResponse {
    pub token: String,
    #[serde(default)]
    pub user: Option<AuthUser>,
}

/// Body of `POST /api/auth/login`.
#[derive(Debug, Serialize)]
pub struct LoginRequest<'a> {
    pub email: &'a str,
    pub password: &'a str,
}

mod references {
    //! Theme/category references arrive either as bare ids or as populated
    //! documents (`{"_id": ..., "name": ...}`), depending on the route.

    use serde::{Deserialize, Deserializer};

    #[derive(Deserialize)]
    #[serde(untagged)]
    enum Reference {
        Id(String),
        Populated {
            #[serde(rename = "_id", alias = "id")]
            id: String,
        },
    }

    pub fn deserialize<'de, D, T>(deserializer: D) -> Result<Vec<T>, D::Error>
    where
        D: Deserializer<'de>,
        T: From<String>,
    {
        let refs = Option::<Vec<Reference>>::deserialize(deserializer)?.unwrap_or_default();
        Ok(refs
            .into_iter()
            .map(|r| match r {
                Reference::Id(id) | Reference::Populated { id } => T::from(id),
            })
            .collect())
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use serde_json::json;

    use super::*;

    #[test]
    fn test_favorite_product_from_backend_json() {
        let product: FavoriteProduct = serde_json::from_value(json!({
            "_id": "65f0a1",
            "name": "Millennium Falcon",
            "price": 849.99,
            "images": ["falcon-1.jpg", "falcon-2.jpg"],
            "stock": 3,
            "themes": [{"_id": "star-wars", "name": "Star Wars"}],
            "categories": ["ucs"],
            "createdAt": "2024-03-01T10:00:00Z",
            "updatedAt": "2024-03-02T10:00:00Z"
        }))
        .unwrap();

        assert_eq!(product.id.as_str(), "65f0a1");
        assert_eq!(product.price, Price::from_cents(84999));
        assert_eq!(product.thumbnail(), Some("falcon-1.jpg"));
        assert_eq!(product.themes, vec![ThemeId::new("star-wars")]);
        assert_eq!(product.categories, vec![CategoryId::new("ucs")]);
        assert!(product.in_stock());
        assert!(product.created_at.is_some());
    }

    #[test]
    fn test_favorite_product_minimal() {
        let product: FavoriteProduct =
            serde_json::from_value(json!({"id": "1", "name": "Brick", "themes": null})).unwrap();
        assert_eq!(product.price, Price::ZERO);
        assert!(product.images.is_empty());
        assert!(product.themes.is_empty());
        assert!(!product.in_stock());
    }

    #[test]
    fn test_favorites_payload_requires_list() {
        let missing = serde_json::from_value::<FavoritesPayload>(json!({"favoriteIds": ["1"]}));
        assert!(missing.is_err());

        let ok: FavoritesPayload = serde_json::from_value(json!({"favorites": []})).unwrap();
        assert!(ok.favorites.is_empty());
        assert!(ok.favorite_ids.is_none());
    }

    #[test]
    fn test_cart_line_total() {
        let line: CartLine = serde_json::from_value(json!({
            "product": {"_id": "p1", "name": "Castle", "price": "19.99"},
            "quantity": 3
        }))
        .unwrap();
        assert_eq!(line.line_total(), Price::from_cents(5997));
    }

    #[test]
    fn test_login_response_user_optional() {
        let response: LoginResponse = serde_json::from_value(json!({"token": "jwt"})).unwrap();
        assert!(response.user.is_none());

        let response: LoginResponse = serde_json::from_value(json!({
            "token": "jwt",
            "user": {"_id": "u1", "email": "kai@ninjago.example", "isAdmin": true}
        }))
        .unwrap();
        assert!(response.user.unwrap().is_admin);
    }
}
