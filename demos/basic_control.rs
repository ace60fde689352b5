use std::time::Duration;
use tokio::time::sleep;
use trackmaster::{DeviceModel, Result, SpeedUnit, Treadmill};
use tracing::{error, info};

#[tokio::main]
async fn main() -> Result<()> {
    // Initialize logging
    tracing_subscriber::fmt::init();

    let port = std::env::args()
        .nth(1)
        .unwrap_or_else(|| "/dev/ttyUSB0".to_string());

    info!("🏃‍♂️ Trackmaster Basic Control Example");
    info!("Opening serial port {}...", port);

    let treadmill = match Treadmill::open(&port, DeviceModel::TrackMaster) {
        Ok(device) => {
            info!("✅ Connected ({} model)", device.model());
            device
        }
        Err(e) => {
            error!("❌ Failed to open port: {}", e);
            return Err(e);
        }
    };

    // Start the ergometry session and the status poll
    treadmill.start().await?;
    info!("✅ Session started");

    // Warm up at 3 km/h
    info!("⚡ Setting speed to 3.0 km/h...");
    treadmill.set_speed(3.0, SpeedUnit::Kilometers).await?;
    sleep(Duration::from_secs(5)).await;

    // Step up to 5 km/h with a slight grade
    info!("📈 Setting speed to 5.0 km/h and elevation to 2.5%...");
    treadmill.set_speed(5.0, SpeedUnit::Kilometers).await?;
    treadmill.set_elevation(2.5).await?;
    sleep(Duration::from_secs(10)).await;

    let status = treadmill.status().await;
    info!("📊 Current Status:");
    info!("  Speed: {:.1}", status.speed);
    info!("  Elevation: {:.1}%", status.elevation);
    info!("  Belt: {}", status.belt);

    // Back down and level out
    info!("📉 Slowing down...");
    treadmill.set_speed(0.0, SpeedUnit::Kilometers).await?;
    treadmill.set_elevation(0.0).await?;
    sleep(Duration::from_secs(2)).await;

    // End the session; the device auto-stops
    info!("🔌 Stopping session...");
    treadmill.stop().await?;
    info!("✅ Session stopped");

    info!("🎉 Basic control example completed!");
    Ok(())
}
