use crate::controller::Outcome;
use crate::ip_geo::{ipapi::IPAPI_SOURCE, ipinfo::IPINFO_SOURCE};
use crate::session::Consent;

use std::fmt::Write;
use std::time::Duration;

pub struct PageView<'a> {
    pub consent: Consent,
    pub ip: &'a Outcome,
    pub auto_browser: bool,
    pub store_available: bool,
    pub bridge_timeout: Duration,
}

pub fn escape_html(text: &str) -> String {
    let mut escaped = String::with_capacity(text.len());
    for c in text.chars() {
        match c {
            '&' => escaped.push_str("&amp;"),
            '<' => escaped.push_str("&lt;"),
            '>' => escaped.push_str("&gt;"),
            '"' => escaped.push_str("&quot;"),
            '\'' => escaped.push_str("&#39;"),
            c => escaped.push(c),
        }
    }
    escaped
}

fn checked(flag: bool) -> &'static str {
    if flag {
        " checked"
    } else {
        ""
    }
}

/// Bridge to `navigator.geolocation`, posts exactly one reply per click
const BRIDGE_SCRIPT: &str = r#"
function currentPosition() {
  return new Promise((resolve) => {
    if (!navigator.geolocation) {
      resolve(null);
      return;
    }
    navigator.geolocation.getCurrentPosition(
      (position) => resolve({
        latitude: position.coords.latitude,
        longitude: position.coords.longitude,
        accuracy: position.coords.accuracy,
      }),
      (error) => resolve({error: {code: error.code, message: error.message}}),
      {timeout: bridgeTimeout, maximumAge: 0},
    );
  });
}

async function share() {
  const status = document.getElementById("browser-status");
  status.textContent = "Waiting for your browser...";
  status.hidden = false;
  try {
    const reply = await currentPosition();
    const response = await fetch("/api/browser-location", {
      method: "POST",
      headers: {"Content-Type": "application/json"},
      body: JSON.stringify(reply),
      signal: AbortSignal.timeout(bridgeTimeout * 2),
    });
    const result = await response.json();
    status.textContent = result.message;
  } catch (error) {
    status.textContent = "Your location could not be sent.";
  }
}

document.getElementById("share").addEventListener("click", share);
if (autoShare) {
  share();
}
"#;

pub fn render_page(view: &PageView<'_>) -> String {
    let mut html = String::new();
    html.push_str(
        "<!DOCTYPE html>\n<html lang=\"en\">\n<head>\n<meta charset=\"utf-8\">\n\
         <meta name=\"viewport\" content=\"width=device-width, initial-scale=1\">\n\
         <title>Location check-in</title>\n</head>\n<body>\n<h1>Location check-in</h1>\n",
    );

    let _ = write!(
        html,
        "<p>This page records your location, with your permission, together with the time of \
         your visit. Two kinds of location can be shared:</p>\n<ul>\n\
         <li><strong>Approximate location</strong> looked up from your IP address by third-party \
         services ({IPAPI_SOURCE}, {IPINFO_SOURCE}). This includes your IP address, city, region \
         and country.</li>\n\
         <li><strong>Precise location</strong> reported by your browser, only after you press \
         \"Share my precise location\" and your browser asks you to allow it.</li>\n</ul>\n\
         <p>Nothing is looked up until you choose below. You can withdraw consent at any time.</p>\n"
    );

    if !view.store_available {
        html.push_str(
            "<p class=\"error\">Location storage is currently unavailable, nothing will be saved.</p>\n",
        );
    }

    let _ = write!(
        html,
        "<form method=\"post\" action=\"/consent\">\n\
         <label><input type=\"checkbox\" name=\"ip\"{}> Record my approximate location from my IP address</label><br>\n\
         <label><input type=\"checkbox\" name=\"browser\"{}> Allow me to share my precise location from this browser</label><br>\n\
         <button type=\"submit\">Save my choices</button>\n</form>\n",
        checked(view.consent.ip),
        checked(view.consent.browser),
    );

    if view.consent.any() {
        html.push_str(
            "<form method=\"post\" action=\"/consent/withdraw\">\n\
             <button type=\"submit\">Withdraw consent</button>\n</form>\n",
        );
    }

    if let Some(message) = view.ip.message() {
        let class = if view.ip.is_stored() { "status" } else { "warning" };
        let _ = writeln!(html, "<p class=\"{class}\">{}</p>", escape_html(&message));
    }

    if view.consent.browser {
        html.push_str(
            "<button id=\"share\" type=\"button\">Share my precise location</button>\n\
             <pre id=\"browser-status\" hidden></pre>\n",
        );
        let _ = writeln!(
            html,
            "<script>\nconst bridgeTimeout = {};\nconst autoShare = {};\n{BRIDGE_SCRIPT}</script>",
            view.bridge_timeout.as_millis(),
            view.auto_browser,
        );
    }

    html.push_str("</body>\n</html>\n");
    html
}
