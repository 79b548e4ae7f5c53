//! Best-effort User-Agent parsing for the logbook.

use lazy_static::lazy_static;
use regex::Regex;
use serde::{Deserialize, Serialize};
use woothee::parser::{Parser, WootheeResult};

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct DeviceInfo {
    pub browser: Option<String>,
    pub browser_version: Option<String>,
    pub os: Option<String>,
    pub os_version: Option<String>,
    pub device: Option<String>,
}

lazy_static! {
    static ref PARSER: Parser = Parser::new();
    /// woothee reports "Android" as the OS but not the handset model
    static ref ANDROID_MODEL: Regex =
        Regex::new(r"Android [\d.]+; ([^;)]+?)(?: Build/[^;)]*)?\)").unwrap();
}

const UNKNOWN: &str = "UNKNOWN";

pub fn parse_user_agent(user_agent: &str) -> DeviceInfo {
    match PARSER.parse(user_agent) {
        Some(result) => from_woothee(user_agent, &result),
        None => DeviceInfo::default(),
    }
}

fn known(value: &str) -> Option<String> {
    let value = value.trim();
    if value.is_empty() || value == UNKNOWN {
        None
    } else {
        Some(value.to_string())
    }
}

fn from_woothee(user_agent: &str, result: &WootheeResult) -> DeviceInfo {
    let browser = known(result.name);
    let browser_version = browser.as_ref().and_then(|_| known(result.version));
    let raw_os = known(result.os);
    let os_version = raw_os.as_ref().and_then(|_| known(&result.os_version));

    let device = match raw_os.as_deref() {
        Some(handset @ ("iPhone" | "iPad" | "iPod")) => Some(handset.to_string()),
        Some("Mac OSX") => Some("Mac".to_string()),
        Some("Android") => Some(
            ANDROID_MODEL
                .captures(user_agent)
                .map(|c| c[1].trim().to_string())
                .filter(|m| m != "K" && !m.is_empty())
                .unwrap_or_else(|| "Generic Smartphone".to_string()),
        ),
        _ => match result.category {
            "crawler" => Some("Spider".to_string()),
            "mobilephone" => Some("Generic Feature Phone".to_string()),
            "smartphone" => Some("Generic Smartphone".to_string()),
            _ if browser.is_some() || raw_os.is_some() => Some("Other".to_string()),
            _ => None,
        },
    };

    let os = raw_os.map(|os| match os.as_str() {
        "iPhone" | "iPad" | "iPod" => "iOS".to_string(),
        "Mac OSX" => "Mac OS X".to_string(),
        _ => os,
    });

    DeviceInfo {
        browser,
        browser_version,
        os,
        os_version,
        device,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_desktop_firefox() {
        let info = parse_user_agent(
            "Mozilla/5.0 (X11; Ubuntu; Linux x86_64; rv:128.0) Gecko/20100101 Firefox/128.0",
        );
        assert_eq!(info.browser.as_deref(), Some("Firefox"));
        assert_eq!(info.browser_version.as_deref(), Some("128.0"));
        assert_eq!(info.os.as_deref(), Some("Linux"));
        assert_eq!(info.device.as_deref(), Some("Other"));
    }

    #[test]
    fn test_iphone_safari() {
        let info = parse_user_agent(
            "Mozilla/5.0 (iPhone; CPU iPhone OS 17_5_1 like Mac OS X) AppleWebKit/605.1.15 (KHTML, like Gecko) Version/17.5 Mobile/15E148 Safari/604.1",
        );
        assert_eq!(info.browser.as_deref(), Some("Safari"));
        assert_eq!(info.os.as_deref(), Some("iOS"));
        assert_eq!(info.device.as_deref(), Some("iPhone"));
    }

    #[test]
    fn test_android_model() {
        let info = parse_user_agent(
            "Mozilla/5.0 (Linux; Android 14; Pixel 8 Build/AP2A.240705.005) AppleWebKit/537.36 (KHTML, like Gecko) Chrome/126.0.6478.122 Mobile Safari/537.36",
        );
        assert_eq!(info.browser.as_deref(), Some("Chrome"));
        assert_eq!(info.os.as_deref(), Some("Android"));
        assert_eq!(info.device.as_deref(), Some("Pixel 8"));
    }

    #[test]
    fn test_unrecognised_agent() {
        assert_eq!(parse_user_agent("totally-custom-client"), DeviceInfo::default());
        assert_eq!(parse_user_agent(""), DeviceInfo::default());
    }
}
