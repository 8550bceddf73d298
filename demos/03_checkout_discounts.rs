/// checkout discounts - premium pricelist, promo code and a 3-month plan
use rental_engine::{
    CheckoutRequest, Decimal, EngineConfig, InMemory, Money, PlanType, Product, PromoCode,
    RentalEngine, SafeTimeProvider, TenureUnit, TimeSource,
};
use chrono::{Duration, TimeZone, Utc};

fn main() -> Result<(), Box<dyn std::error::Error>> {
    let time = SafeTimeProvider::new(TimeSource::Test(
        Utc.with_ymd_and_hms(2024, 9, 1, 12, 0, 0).unwrap(),
    ));
    let now = time.now();

    let stores = InMemory::new();
    let projector = stores
        .catalog
        .insert(Product::new("4k projector", Money::from_major(80_000), 3));
    let engine = RentalEngine::new(EngineConfig::default(), stores.stores())?;

    engine.create_promo(
        PromoCode::percentage("welcome10", Decimal::from(10), now - Duration::days(1), now + Duration::days(30))
            .with_min_order(Money::from_major(1_000))
            .with_max_discount(Money::from_major(500))
            .with_usage_limit(100),
    )?;

    // a dry run first
    let check = engine.validate_promo("WELCOME10", Money::from_major(8_000), &time)?;
    println!("{}", serde_json::to_string_pretty(&check.outcome())?);

    let receipt = engine.checkout(
        CheckoutRequest::new(projector, 1, now, now + Duration::weeks(2), TenureUnit::Week)
            .with_pricelist("premium")
            .with_promo("welcome10")
            .with_plan(PlanType::ThreeMonths),
        &time,
    )?;

    println!("pricelist: {}", receipt.quote.pricelist);
    println!("rent:      {}", receipt.rent);
    if let Some(promo) = &receipt.promo {
        println!("discount:  {} ({})", promo.discount_amount, promo.code);
    }
    println!("due:       {}", receipt.amount_due);
    println!("deposit:   {}", receipt.deposit);

    if let Some(plan) = &receipt.plan {
        for installment in &plan.installments {
            println!(
                "  #{} {} due {}",
                installment.sequence,
                installment.amount,
                installment.due_date.format("%Y-%m-%d")
            );
        }
    }

    // a bogus plan type is rejected
    if let Err(e) = engine.create_installment_plan(receipt.reservation.order_id, receipt.amount_due, "6-months", &time) {
        println!("rejected: {e}");
    }

    Ok(())
}
