/// quick start - price a rental and reserve it
use rental_engine::{
    CheckoutRequest, EngineConfig, InMemory, Money, Product, RentalEngine, SafeTimeProvider,
    TenureUnit, TimeSource,
};
use chrono::{Duration, TimeZone, Utc};

fn main() -> Result<(), Box<dyn std::error::Error>> {
    let time = SafeTimeProvider::new(TimeSource::Test(
        Utc.with_ymd_and_hms(2024, 8, 10, 9, 0, 0).unwrap(),
    ));

    // one camera worth 25,000
    let stores = InMemory::new();
    let camera = stores
        .catalog
        .insert(Product::new("mirrorless camera", Money::from_major(25_000), 1));
    let engine = RentalEngine::new(EngineConfig::default(), stores.stores())?;

    // three days on the standard pricelist
    let start = time.now();
    let receipt = engine.checkout(
        CheckoutRequest::new(camera, 1, start, start + Duration::days(3), TenureUnit::Day),
        &time,
    )?;

    println!("rent:    {}", receipt.rent);
    println!("deposit: {}", receipt.deposit);
    println!("{}", serde_json::to_string_pretty(&receipt.reservation)?);

    Ok(())
}
