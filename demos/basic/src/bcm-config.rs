/*
 * Copyright (C) 2015-2023 IoT.bzh Company
 * Author: Fulup Ar Foll <fulup@iot.bzh>
 *
 * Redpesk interface code/config use MIT License and can be freely copy/modified even within proprietary code
 * License: $RP_BEGIN_LICENSE$ SPDX:MIT https://opensource.org/licenses/MIT $RP_END_LICENSE$
 *
 */
use sockbcm::prelude::*;
use std::env;

// Demo knobs, environment first then `--name value` arguments.
//   INTERFACE=vcan0  CANFD=0  FRAMEID=0x222  VERBOSE=1  COUNT=0
#[allow(dead_code)]
pub struct DemoConfig {
    pub iface: String,
    pub variant: CanVariant,
    pub frameid: SockCanId,
    pub verbose: bool,
    pub count: u64,
}

fn parse_id(value: &str) -> Result<SockCanId, String> {
    let parsed = match value.strip_prefix("0x").or_else(|| value.strip_prefix("0X")) {
        Some(hexa) => SockCanId::from_str_radix(hexa, 16),
        None => value.parse::<SockCanId>(),
    };
    parsed.map_err(|error| format!("invalid can id '{}': {}", value, error))
}

fn parse_flag(value: &str) -> bool {
    !matches!(value, "0" | "false" | "no" | "off")
}

impl DemoConfig {
    pub fn load() -> Result<DemoConfig, String> {
        let mut config = DemoConfig {
            iface: "vcan0".to_string(),
            variant: CanVariant::Classic,
            frameid: 0x222,
            verbose: true,
            count: 0,
        };

        let mut knobs: Vec<(String, String)> = ["INTERFACE", "CANFD", "FRAMEID", "VERBOSE", "COUNT"]
            .iter()
            .filter_map(|name| env::var(name).ok().map(|value| (name.to_string(), value)))
            .collect();

        let mut args = env::args().skip(1);
        while let Some(arg) = args.next() {
            let name = match arg.strip_prefix("--") {
                Some(name) => name.to_uppercase(),
                None => return Err(format!("unexpected argument '{}' (expect --name value)", arg)),
            };
            let value = args.next().ok_or(format!("missing value for --{}", name.to_lowercase()))?;
            knobs.push((name, value));
        }

        for (name, value) in knobs {
            match name.as_str() {
                "INTERFACE" | "IFACE" => config.iface = value,
                "CANFD" | "FD" => {
                    config.variant = if parse_flag(&value) {
                        CanVariant::Fd
                    } else {
                        CanVariant::Classic
                    }
                }
                "FRAMEID" => config.frameid = parse_id(&value)?,
                "VERBOSE" => config.verbose = parse_flag(&value),
                "COUNT" => config.count = value.parse().map_err(|error| format!("invalid count '{}': {}", value, error))?,
                _ => return Err(format!("unknown option '{}'", name.to_lowercase())),
            }
        }
        Ok(config)
    }
}
