use std::time::Duration;

use bmc_ipmi::sel::RecordClass;
use bmc_ipmi::{Device, DeviceConfig, KcsConfig, LanConfig, SelEngine, SelRecord, SsifConfig};

fn main() -> Result<(), Box<dyn std::error::Error>> {
    // Example:
    //   cargo run --example sel_list -- kcs
    //   cargo run --example sel_list -- lan 192.168.1.10 admin password
    let args: Vec<String> = std::env::args().skip(1).collect();
    let mut device = Device::open(config_from_args(&args)?)?;

    {
        let mut sel = SelEngine::new(&mut device);
        let info = sel.sel_info()?;
        println!(
            "SEL version {:#04x}, {} entries, {} bytes free{}",
            info.version,
            info.entries,
            info.free_space,
            if info.overflow { ", overflowed" } else { "" }
        );

        let count = sel.parse_with(|record| {
            eprint!("\rfetched record {:#06x}", record.record_id()?);
            Ok(())
        })?;
        eprintln!();

        for record in sel.records() {
            println!("{}", describe(record));
        }
        println!("{count} records");
    }

    device.close()?;
    Ok(())
}

fn describe(record: &SelRecord) -> String {
    let id = match record.record_id() {
        Ok(id) => id,
        Err(err) => return format!("<unreadable record: {err}>"),
    };
    match record.class() {
        Ok(RecordClass::SystemEvent) => format!(
            "{id:#06x} ts={} sensor type {:#04x} #{:#04x} {:?} data {:02x} {:02x} {:02x}",
            record.timestamp().unwrap_or_default(),
            record.sensor_type().unwrap_or_default(),
            record.sensor_number().unwrap_or_default(),
            record.event_direction().ok(),
            record.event_data1().unwrap_or_default(),
            record.event_data2().unwrap_or_default(),
            record.event_data3().unwrap_or_default(),
        ),
        Ok(RecordClass::TimestampedOem) => format!(
            "{id:#06x} ts={} OEM iana {} {:02x?}",
            record.timestamp().unwrap_or_default(),
            record.manufacturer_id().unwrap_or_default(),
            record.oem_data().unwrap_or_default(),
        ),
        Ok(RecordClass::NonTimestampedOem) => format!(
            "{id:#06x} OEM {:02x?}",
            record.oem_data().unwrap_or_default()
        ),
        _ => format!("{id:#06x} unknown {:02x?}", record.as_bytes()),
    }
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
                .into())
        }
        _ => Err("transport must be kcs, ssif or lan".into()),
    }
}
