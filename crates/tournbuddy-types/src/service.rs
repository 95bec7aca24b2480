//! Service constants shared by every tournbuddy component.
//!
//! The daemon, the browser and the endpoint type all read these; nothing else
//! re-declares them.

/// DNS-SD service type for tournament hosts.
pub const SERVICE_TYPE: &str = "_tournbuddy._tcp.";

/// DNS-SD domain the service is advertised in.
pub const SERVICE_DOMAIN: &str = "local.";

/// Default TCP port for a tournament host.
pub const DEFAULT_PORT: u16 = 25600;

/// File name prefix of a host's local control socket.
pub const SOCKET_PREFIX: &str = "tournamentd.";

/// File name suffix of a host's local control socket.
pub const SOCKET_SUFFIX: &str = ".sock";

/// Fully qualified service type, as used by mDNS browse and register calls.
pub fn service_type_domain() -> String {
    format!("{SERVICE_TYPE}{SERVICE_DOMAIN}")
}

/// Socket file name for the process with the given id.
pub fn socket_file_name(pid: u32) -> String {
    format!("{SOCKET_PREFIX}{pid}{SOCKET_SUFFIX}")
}

/// Longest file name [`socket_file_name`] can produce.
pub fn max_socket_file_name_len() -> usize {
    socket_file_name(u32::MAX).len()
}

/// Whether a directory entry looks like a host's control socket.
pub fn is_socket_file_name(name: &str) -> bool {
    name.strip_prefix(SOCKET_PREFIX)
        .and_then(|rest| rest.strip_suffix(SOCKET_SUFFIX))
        .is_some_and(|token| !token.is_empty())
}

/// Strip the service type and domain from a full DNS-SD instance name.
///
/// `"Main Event._tournbuddy._tcp.local."` becomes `"Main Event"`. Names that
/// do not carry the suffix are returned unchanged.
pub fn instance_name(fullname: &str) -> &str {
    let suffix = service_type_domain();
    fullname
        .strip_suffix(suffix.as_str())
        .and_then(|rest| rest.strip_suffix('.'))
        .unwrap_or(fullname)
}
