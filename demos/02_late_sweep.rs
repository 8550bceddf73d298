/// late sweep - scheduled late marking with background notifications
use rental_engine::store::RecordingNotifier;
use rental_engine::{
    CheckoutRequest, EngineConfig, InMemory, LateReturnSweeper, Money, Product, RentalEngine,
    ReservationFilter, ReservationStatus, SafeTimeProvider, TenureUnit, TimeSource,
};
use chrono::{Duration, TimeZone, Utc};
use std::sync::Arc;
use tracing_subscriber::EnvFilter;

#[tokio::main(flavor = "current_thread")]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info,rental_engine=debug"));
    tracing_subscriber::fmt().with_env_filter(filter).init();

    let time = SafeTimeProvider::new(TimeSource::Test(
        Utc.with_ymd_and_hms(2024, 8, 1, 10, 0, 0).unwrap(),
    ));
    let controller = time.test_control().unwrap();

    let stores = InMemory::new();
    let bikes = stores
        .catalog
        .insert(Product::new("e-bike", Money::from_major(60_000), 5));
    let engine = Arc::new(RentalEngine::new(EngineConfig::default(), stores.stores())?);

    let start = time.now();
    for days in [1, 2, 7] {
        let receipt = engine.checkout(
            CheckoutRequest::new(bikes, 1, start, start + Duration::days(days), TenureUnit::Day),
            &time,
        )?;
        engine.pick_up(receipt.reservation.id, &time)?;
    }

    // the gateway flakes once before accepting
    let notifier = Arc::new(RecordingNotifier::failing_first(1));
    let (sweeper, worker) = LateReturnSweeper::new(engine.clone(), notifier.clone());
    let worker = tokio::spawn(worker.run());

    controller.advance(Duration::days(4));
    let summary = sweeper.sweep(&time).await?;
    println!("{summary:#?}");

    for r in engine.list_reservations(&ReservationFilter::with_status(ReservationStatus::Late))? {
        println!("late: {} fee {} ({} days)", r.id, r.late_fee, r.days_late);
    }

    drop(sweeper);
    let stats = worker.await?;
    println!("notifications delivered: {} after {} attempts", stats.delivered, stats.attempts);

    Ok(())
}
