use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Category {
    pub id: i64,
    pub name: String,
}

/// One product image. `type_code` is `O`, `PF`, `PB` or `M` (with model).
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct GalleryImage {
    #[serde(default)]
    pub image: Option<String>,
    #[serde(default)]
    pub width: Option<i64>,
    #[serde(default)]
    pub height: Option<i64>,
    #[serde(default)]
    pub product: Option<String>,
    #[serde(rename = "type", default)]
    pub image_type: Option<String>,
    #[serde(default)]
    pub type_code: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Product {
    pub name: String,
    #[serde(default)]
    pub slug: Option<String>,
    #[serde(default)]
    pub description: Option<String>,
    #[serde(default)]
    pub price: Option<f64>,
    #[serde(default)]
    pub material: Option<String>,
    #[serde(default)]
    pub rating: Option<f64>,
    #[serde(default)]
    pub is_featured: Option<bool>,
    #[serde(default)]
    pub category: Vec<Category>,
    #[serde(default)]
    pub model: Vec<GalleryImage>,
    #[serde(default)]
    pub gallery: Vec<GalleryImage>,
}

impl Product {
    /// Make sure there is a picture to show in the "with model" slot: when a
    /// product has no model shots, its first gallery image is used.
    pub fn fill_model_from_gallery(&mut self) {
        if self.model.is_empty() {
            if let Some(first) = self.gallery.first() {
                self.model.push(first.clone());
            }
        }
    }

    pub fn display_price(&self) -> String {
        match self.price {
            Some(price) => format!("{:.2}", price),
            None => "-".to_string(),
        }
    }

    pub fn category_names(&self) -> String {
        self.category
            .iter()
            .map(|c| c.name.as_str())
            .collect::<Vec<_>>()
            .join(", ")
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ReviewAuthor {
    pub username: String,
    #[serde(default)]
    pub email: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ReviewedProduct {
    pub name: String,
    #[serde(default)]
    pub slug: Option<String>,
    #[serde(default)]
    pub rating: Option<f64>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Review {
    pub user: ReviewAuthor,
    pub product: ReviewedProduct,
    pub rating: i64,
    #[serde(default)]
    pub review: Option<String>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_product_response() {
        let json = r#"{"name":"Linen Shirt","slug":"linen-shirt","description":"Loose fit","price":150000.0,"material":"Linen","rating":4.5,"is_featured":true,"category":[{"name":"Shirt","id":2}],"model":[],"gallery":[{"image":"http://cdn/front.png","width":600,"height":800,"product":"Linen Shirt","type":"Product Front","type_code":"PF"}],"extra_field":1}"#;

        let product: Product = serde_json::from_str(json).expect("Failed to parse product JSON");
        assert_eq!(product.slug.as_deref(), Some("linen-shirt"));
        assert_eq!(product.category_names(), "Shirt");
        assert_eq!(product.gallery[0].image_type.as_deref(), Some("Product Front"));
        assert_eq!(product.display_price(), "150000.00");
    }

    #[test]
    fn test_fill_model_from_gallery() {
        let front = GalleryImage {
            image: Some("front.png".to_string()),
            type_code: Some("PF".to_string()),
            ..Default::default()
        };
        let mut product: Product = serde_json::from_str(r#"{"name":"Tee"}"#).unwrap();
        product.fill_model_from_gallery();
        assert!(product.model.is_empty());

        product.gallery.push(front.clone());
        product.fill_model_from_gallery();
        assert_eq!(product.model, vec![front.clone()]);

        // Existing model shots are kept as-is
        product.fill_model_from_gallery();
        assert_eq!(product.model.len(), 1);
    }
}
