/*
 * Copyright 2024 Oxide Computer Company
 */

use crate::config::ConfigPorts;

/// Registry key holding the display server's service configuration.
pub const DISPLAY_SERVER_KEY: &str = r"HKLM\SOFTWARE\TightVNC\Server";

/**
 * Display server settings, as DWORD registry values.  Loopback connections
 * must be accepted because the proxy reaches the server on localhost.
 */
pub fn display_server_settings(ports: &ConfigPorts) -> Vec<(&'static str, u32)> {
    vec![
        ("RfbPort", u32::from(ports.display)),
        ("AcceptRfbConnections", 1),
        ("AllowLoopback", 1),
        ("LoopbackOnly", 0),
        ("AcceptHttpConnections", 0),
        ("UseVncAuthentication", 0),
        ("RemoveWallpaper", 1),
    ]
}

pub const LANDING_PAGE: &str = "index.html";

/**
 * The front-end landing page: send the browser straight into the client,
 * connecting automatically and reconnecting if the session drops.  The client
 * takes host and port from the page location, so no address is baked in.
 */
pub fn redirect_page() -> String {
    let target = "vnc.html?autoconnect=true&reconnect=true&resize=scale\
        &path=websockify";

    [
        "<!DOCTYPE html>".to_string(),
        "<html>".to_string(),
        "<head>".to_string(),
        "<meta charset=\"utf-8\">".to_string(),
        "<title>Remote Desktop</title>".to_string(),
        format!("<meta http-equiv=\"refresh\" content=\"0; url={}\">",
            target.replace('&', "&amp;")),
        format!("<script>window.location.replace({:?});</script>", target),
        "</head>".to_string(),
        "<body>".to_string(),
        format!("<a href=\"{}\">Connect</a>", target.replace('&', "&amp;")),
        "</body>".to_string(),
        "</html>".to_string(),
        "".to_string(),
    ]
    .join("\n")
}
