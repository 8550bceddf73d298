/// reservation lifecycle - pick up, extend, return with a damage deduction
use rental_engine::{
    CheckoutRequest, Deduction, EngineConfig, InMemory, Money, Product, RentalEngine,
    SafeTimeProvider, TenureUnit, TimeSource,
};
use chrono::{Duration, TimeZone, Utc};

fn main() -> Result<(), Box<dyn std::error::Error>> {
    println!("=== reservation lifecycle ===\n");

    let time = SafeTimeProvider::new(TimeSource::Test(
        Utc.with_ymd_and_hms(2024, 8, 10, 9, 0, 0).unwrap(),
    ));
    let controller = time.test_control().unwrap();

    let stores = InMemory::new();
    let tent = stores
        .catalog
        .insert(Product::new("4-person tent", Money::from_major(12_000), 2));
    let engine = RentalEngine::new(EngineConfig::default(), stores.stores())?;

    let start = time.now();
    let receipt = engine.checkout(
        CheckoutRequest::new(tent, 1, start, start + Duration::days(2), TenureUnit::Day),
        &time,
    )?;
    let id = receipt.reservation.id;
    println!("reserved {} for {} (deposit {})", id, receipt.rent, receipt.deposit);

    let picked = engine.pick_up(id, &time)?;
    println!("status: {}", picked.status);

    // customer wants two more days
    controller.advance(Duration::days(1));
    let extended = engine.extend(id, start + Duration::days(4), &time)?;
    println!(
        "extended to {} for an extra {}",
        extended.end_at.format("%Y-%m-%d"),
        extended.extension_charges
    );

    controller.advance(Duration::days(3));
    let returned = engine.return_item(
        id,
        vec![Deduction::new("torn rain fly", Money::from_major(350))],
        &time,
    )?;
    println!("returned; total charges {}", returned.total_charges());
    println!(
        "deposit {} - deductions {} = refund {}",
        returned.deposit,
        returned.deductions,
        returned.deposit_refund.unwrap_or(Money::ZERO)
    );

    println!("\naudit trail:");
    for event in stores.audit.events_for(id) {
        println!(
            "  {:?} -> {} at {}",
            event.from_status,
            event.to_status,
            event.timestamp.format("%Y-%m-%d %H:%M")
        );
    }

    println!("\nevents:");
    for event in engine.take_events() {
        println!("  {event:?}");
    }

    Ok(())
}
