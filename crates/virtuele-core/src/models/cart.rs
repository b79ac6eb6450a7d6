use serde::{Deserialize, Serialize};

use super::Product;

/// Garment size accepted by the cart endpoints.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Size {
    S,
    M,
    L,
}

impl Size {
    pub fn as_str(&self) -> &'static str {
        match self {
            Size::S => "S",
            Size::M => "M",
            Size::L => "L",
        }
    }
}

impl std::fmt::Display for Size {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl std::str::FromStr for Size {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_uppercase().as_str() {
            "S" => Ok(Size::S),
            "M" => Ok(Size::M),
            "L" => Ok(Size::L),
            _ => Err(format!("Size must be S, M or L, got '{}'", s)),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ProductCart {
    pub product: Product,
    pub qty: u32,
    pub size: Size,
    #[serde(default)]
    pub subtotal: Option<f64>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Cart {
    #[serde(default)]
    pub id: Option<i64>,
    #[serde(default)]
    pub products: Vec<ProductCart>,
    #[serde(default)]
    pub checked_out: bool,
    #[serde(default)]
    pub created: Option<String>,
    #[serde(default)]
    pub total: Option<f64>,
    #[serde(default)]
    pub user: Option<i64>,
}

impl Cart {
    pub fn item_count(&self) -> u32 {
        self.products.iter().map(|p| p.qty).sum()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_size_parsing_is_case_insensitive() {
        assert_eq!("m".parse::<Size>(), Ok(Size::M));
        assert_eq!("L".parse::<Size>(), Ok(Size::L));
        assert!("xl".parse::<Size>().is_err());
        assert_eq!(Size::S.to_string(), "S");
    }

    #[test]
    fn test_parse_cart_response() {
        let json = r#"{"id":7,"products":[{"product":{"name":"Tee","slug":"tee"},"qty":2,"size":"M","subtotal":200.0},{"product":{"name":"Cap","slug":"cap"},"qty":1,"size":"S","subtotal":50.0}],"checked_out":false,"created":"2021-06-30T04:23:00Z","total":250,"user":3}"#;

        let cart: Cart = serde_json::from_str(json).expect("Failed to parse cart JSON");
        assert_eq!(cart.id, Some(7));
        assert_eq!(cart.item_count(), 3);
        assert_eq!(cart.total, Some(250.0));
        assert_eq!(cart.products[0].size, Size::M);
    }
}
