/// Header a proxy uses to carry the original client address.
pub const FORWARDED_FOR_HEADER: &str = "X-Forwarded-For";

/// Work out the submitter's host for a job.
///
/// A non-blank `X-Forwarded-For` value wins, taking its first entry when it
/// lists a proxy chain; otherwise the transport peer address is used.
pub fn resolve_client_host(forwarded_for: Option<&str>, remote_addr: Option<&str>) -> Option<String> {
    let forwarded = forwarded_for
        .and_then(|header| header.split(',').next())
        .map(str::trim)
        .filter(|host| !host.is_empty());

    forwarded
        .or_else(|| remote_addr.map(str::trim).filter(|host| !host.is_empty()))
        .map(ToString::to_string)
}
