pub mod calculator;
pub mod pricelist;

pub use calculator::{PriceQuote, PricingCalculator};
pub use pricelist::{Discount, DiscountKind, PricelistCatalog, PricelistRule};
