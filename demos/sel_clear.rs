use std::time::Duration;

use bmc_ipmi::{Device, LanConfig, PrivilegeLevel, RetryPolicy, SelConfig, SelEngine};

fn main() -> Result<(), Box<dyn std::error::Error>> {
    // Example:
    //   cargo run --example sel_clear -- 192.168.1.10 admin password
    //   cargo run --example sel_clear -- 192.168.1.10 admin password 0x0042
    let mut args = std::env::args().skip(1);
    let host = args.next().ok_or("missing <host>")?;
    let username = args.next().ok_or("missing <username>")?;
    let password = args.next().ok_or("missing <password>")?;
    let record = args.next().map(|s| parse_u16(&s)).transpose()?;

    let mut device = Device::open(
        LanConfig::new(host)
            .username(username)
            .password(password)
            .privilege(PrivilegeLevel::Operator)
            .timeout(Duration::from_secs(2)),
    )?;

    {
        let config = SelConfig::new().policy(RetryPolicy::new(5, Duration::from_millis(500)));
        let mut sel = SelEngine::with_config(&mut device, config);
        match record {
            Some(id) => {
                sel.delete_record(id)?;
                println!("deleted SEL record {id:#06x}");
            }
            None => {
                sel.clear_log_wait()?;
                println!("SEL cleared");
            }
        }
    }

    device.close()?;
    Ok(())
}

fn parse_u16(s: &str) -> Result<u16, Box<dyn std::error::Error>> {
    if let Some(hex) = s.strip_prefix("0x").or_else(|| s.strip_prefix("0X")) {
        Ok(u16::from_str_radix(hex, 16)?)
    } else {
        Ok(s.parse::<u16>()?)
    }
}
