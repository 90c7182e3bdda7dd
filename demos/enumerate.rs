//! List attached USB devices recognized as supported depth cameras.

use depthcam::UsbHost;

fn main() {
    env_logger::init();

    println!("{}", depthcam::supported_cameras_notice());

    let host = match depthcam::RusbHost::new() {
        Ok(h) => h,
        Err(e) => {
            eprintln!("Failed to initialize libusb: {}", e);
            std::process::exit(1);
        }
    };

    match depthcam::list_cameras(&host) {
        Ok(cameras) => {
            println!("Found {} camera device(s):", cameras.len());
            for (i, (dev, found)) in cameras.iter().enumerate() {
                println!(
                    "  [{}] {}  model={}  roles={:?}  access={}",
                    i,
                    dev,
                    found.model.name,
                    found.roles,
                    if host.has_permission(dev) { "yes" } else { "no" }
                );
            }
        }
        Err(e) => {
            eprintln!("Error: {}", e);
            std::process::exit(1);
        }
    }

    match host.devices().and_then(|devices| depthcam::scan(&devices)) {
        Ok(result) => println!(
            "Session would use ToF={:?} RGB={:?} (unified: {})",
            result.tof.map(|d| d.to_string()),
            result.rgb.map(|d| d.to_string()),
            result.unified_early_exit
        ),
        Err(e) => println!("No usable camera: {}", e),
    }
}
