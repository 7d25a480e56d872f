use std::time::Duration;

use bmc_ipmi::commands::GetDeviceId;
use bmc_ipmi::{Device, DeviceConfig, KcsConfig, LanConfig, RetryPolicy, SsifConfig};

fn main() -> Result<(), Box<dyn std::error::Error>> {
    // Example:
    //   cargo run --example get_device_id -- kcs
    //   cargo run --example get_device_id -- ssif /dev/i2c-1
    //   cargo run --example get_device_id -- lan 192.168.1.10 admin password
    let args: Vec<String> = std::env::args().skip(1).collect();
    let mut device = Device::open(config_from_args(&args)?)?;

    let id = device.call(&GetDeviceId, &RetryPolicy::default())?;
    println!("transport:        {}", device.transport());
    println!("device id:        {:#04x} rev {}", id.device_id, id.device_revision);
    println!("firmware:         {}.{:02x}", id.firmware_major, id.firmware_minor);
    println!(
        "ipmi version:     {}.{}",
        id.ipmi_version & 0x0F,
        id.ipmi_version >> 4
    );
    println!("manufacturer id:  {}", id.manufacturer_id);
    println!("product id:       {:#06x}", id.product_id);
    println!("sel device:       {}", id.supports_sel());

    device.close()?;
    Ok(())
}

fn config_from_args(args: &[String]) -> Result<DeviceConfig, Box<dyn std::error::Error>> {
    let kind = args.first().map(String::as_str).unwrap_or("kcs");
    match kind {
        "kcs" => Ok(KcsConfig::new().into()),
        "ssif" => {
            let mut config = SsifConfig::new();
            if let Some(path) = args.get(1) {
                config = config.device_path(path);
            }
            Ok(config.into())
        }
        "lan" => {
            let host = args.get(1).ok_or("missing <host>")?;
            let username = args.get(2).ok_or("missing <username>")?;
            let password = args.get(3).ok_or("missing <password>")?;
            Ok(LanConfig::new(host.as_str())
                .username(username)
                .password(password)
                .timeout(Duration::from_secs(2))
                .retries(3)
                .into())
        }
        _ => Err("transport must be kcs, ssif or lan".into()),
    }
}
