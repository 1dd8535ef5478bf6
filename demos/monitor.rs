use std::env;
use std::time::Duration;

use melview::MelView;

#[tokio::main]
async fn main() -> melview::Result<()> {
    tracing_subscriber::fmt::init();

    let email = env::var("MELVIEW_EMAIL").expect("usage: set MELVIEW_EMAIL and MELVIEW_PASSWORD");
    let password =
        env::var("MELVIEW_PASSWORD").expect("usage: set MELVIEW_EMAIL and MELVIEW_PASSWORD");
    let local = env::args().any(|a| a == "--local");

    let client = MelView::builder(email, password).local_control(local).build();

    println!("Logging in...");
    client.login().await?;

    let mut devices = client.list_devices().await?;
    println!("Found {} unit(s). Polling for updates...", devices.len());

    loop {
        for device in &mut devices {
            let name = device.friendly_name().to_string();
            let power = if device.is_power_on().await? { "on" } else { "off" };
            let mode = device.mode().await?;
            let room = device.room_temperature().await?;
            let target = device.target_temperature().await?;
            let fan = device.fan_speed().await?;
            print!(
                "[{name}] {power} | mode: {mode} | {room:.1}\u{00b0}C -> {target:.1}\u{00b0}C | fan: {fan}"
            );
            if let Some(outdoor) = device.outside_temperature().await? {
                print!(" | outdoor: {outdoor:.1}\u{00b0}C");
            }
            println!();
        }
        tokio::time::sleep(Duration::from_secs(60)).await;
    }
}
