use std::{
    fmt,
    net::{AddrParseError, IpAddr},
    num::ParseIntError,
    str::FromStr,
};

/// Checks whether `token` is a syntactically valid IPv4 or IPv6 literal.
///
/// This is the same check applied to every address the operator types in, e.g. the engine VM
/// address, the gateway or an iSCSI portal.
pub fn is_valid_address(token: &str) -> bool {
    is_valid_ipv4(token) || is_valid_ipv6(token)
}

/// Dotted quad, each group one to three digits and at most 255.
pub fn is_valid_ipv4(token: &str) -> bool {
    let groups: Vec<&str> = token.split('.').collect();

    groups.len() == 4
        && groups
            .iter()
            .all(|g| (1..=3).contains(&g.len()) && g.chars().all(|c| c.is_ascii_digit()))
        && groups
            .iter()
            .all(|g| g.parse::<u16>().map(|v| v <= 255).unwrap_or(false))
}

/// Accepts up to eight uncompressed hex groups, or a single `::` with at most seven groups
/// spread over both sides of it.
pub fn is_valid_ipv6(token: &str) -> bool {
    match token.split_once("::") {
        None => {
            let groups: Vec<&str> = token.split(':').collect();
            groups.len() <= 8 && groups.iter().all(|g| is_hex_group(g))
        }
        Some((head, tail)) => {
            if tail.contains("::") {
                return false;
            }
            match (count_hex_groups(head), count_hex_groups(tail)) {
                (Some(head), Some(tail)) => head + tail <= 7,
                _ => false,
            }
        }
    }
}

fn is_hex_group(group: &str) -> bool {
    (1..=4).contains(&group.len()) && group.chars().all(|c| c.is_ascii_hexdigit())
}

/// Number of groups on one side of a `::`, `None` if any of them is malformed.
fn count_hex_groups(side: &str) -> Option<usize> {
    if side.is_empty() {
        return Some(0);
    }

    let groups: Vec<&str> = side.split(':').collect();
    groups
        .iter()
        .all(|g| is_hex_group(g))
        .then_some(groups.len())
}

/// Possible errors that might occur when parsing CIDR addresses.
#[derive(Debug)]
pub enum CidrAddressParseError {
    /// No delimiter for separating address and mask was found.
    NoDelimiter,
    /// The IP address part could not be parsed.
    InvalidAddr(AddrParseError),
    /// The mask could not be parsed or is out of range for the address family.
    InvalidMask(Option<ParseIntError>),
}

impl fmt::Display for CidrAddressParseError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::NoDelimiter => write!(f, "missing '/' between address and prefix length"),
            Self::InvalidAddr(err) => write!(f, "invalid address: {err}"),
            Self::InvalidMask(Some(err)) => write!(f, "invalid prefix length: {err}"),
            Self::InvalidMask(None) => write!(f, "prefix length out of range"),
        }
    }
}

impl std::error::Error for CidrAddressParseError {}

/// An IP address (IPv4 or IPv6) together with its prefix length, as used for the static
/// address of the engine VM.
///
/// The mask is enforced to be `0 <= mask <= 32` for IPv4 and `0 <= mask <= 128` for IPv6.
#[derive(Clone, Debug, PartialEq)]
pub struct CidrAddress {
    addr: IpAddr,
    mask: usize,
}

impl CidrAddress {
    /// Constructs a new CIDR address, failing if the mask is invalid for the address.
    pub fn new<T: Into<IpAddr>>(addr: T, mask: usize) -> Result<Self, CidrAddressParseError> {
        let addr = addr.into();

        if mask > mask_limit(&addr) {
            Err(CidrAddressParseError::InvalidMask(None))
        } else {
            Ok(Self { addr, mask })
        }
    }
}

impl FromStr for CidrAddress {
    type Err = CidrAddressParseError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let (addr, mask) = s
            .split_once('/')
            .ok_or(CidrAddressParseError::NoDelimiter)?;

        let addr: IpAddr = addr.parse().map_err(CidrAddressParseError::InvalidAddr)?;
        let mask = mask
            .parse()
            .map_err(|err| CidrAddressParseError::InvalidMask(Some(err)))?;

        Self::new(addr, mask)
    }
}

impl fmt::Display for CidrAddress {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}", self.addr, self.mask)
    }
}

fn mask_limit(addr: &IpAddr) -> usize {
    if addr.is_ipv4() { 32 } else { 128 }
}

/// Possible errors that might occur when parsing FQDNs.
#[derive(Debug, Eq, PartialEq)]
pub enum FqdnParseError {
    MissingHostname,
    NumericHostname,
    InvalidPart(String),
}

impl fmt::Display for FqdnParseError {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        use FqdnParseError::*;
        match self {
            MissingHostname => write!(f, "missing hostname part"),
            NumericHostname => write!(f, "hostname cannot be purely numeric"),
            InvalidPart(part) => write!(
                f,
                "FQDN must only consist of alphanumeric characters and dashes. Invalid part: '{part}'",
            ),
        }
    }
}

impl std::error::Error for FqdnParseError {}

/// Fully qualified domain name of the engine VM, split into host and domain part.
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct Fqdn {
    parts: Vec<String>,
}

impl Fqdn {
    pub fn from(fqdn: &str) -> Result<Self, FqdnParseError> {
        let parts = fqdn
            .split('.')
            .map(ToOwned::to_owned)
            .collect::<Vec<String>>();

        if let Some(part) = parts.iter().find(|part| !Self::validate_single(part)) {
            return Err(FqdnParseError::InvalidPart(part.clone()));
        }

        if parts.len() < 2 {
            Err(FqdnParseError::MissingHostname)
        } else if parts[0].chars().all(|c| c.is_ascii_digit()) {
            Err(FqdnParseError::NumericHostname)
        } else {
            Ok(Self { parts })
        }
    }

    /// Everything after the first label.
    pub fn domain(&self) -> String {
        self.parts[1..].join(".")
    }

    fn validate_single(s: &str) -> bool {
        let bytes = s.as_bytes();
        match (bytes.first(), bytes.last()) {
            (Some(first), Some(last)) => {
                first.is_ascii_alphanumeric()
                    && last.is_ascii_alphanumeric()
                    && bytes.iter().all(|c| c.is_ascii_alphanumeric() || *c == b'-')
            }
            _ => false,
        }
    }
}

impl FromStr for Fqdn {
    type Err = FqdnParseError;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        Self::from(value)
    }
}

impl fmt::Display for Fqdn {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(f, "{}", self.parts.join("."))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn ipv4_addresses() {
        assert!(is_valid_address("192.168.1.1"));
        assert!(is_valid_address("0.0.0.0"));
        assert!(is_valid_address("255.255.255.255"));

        assert!(!is_valid_address("256.1.1.1"));
        assert!(!is_valid_address("1.2.3.999"));
        assert!(!is_valid_address("1.2.3"));
        assert!(!is_valid_address("1.2.3.4.5"));
        assert!(!is_valid_address("1.2.3.a"));
        assert!(!is_valid_address("1..2.3"));
        assert!(!is_valid_address("1.2.3.0001"));
    }

    #[test]
    fn ipv6_addresses() {
        assert!(is_valid_address("::1"));
        assert!(is_valid_address("::"));
        assert!(is_valid_address("fe80::"));
        assert!(is_valid_address("fe80::1:2"));
        assert!(is_valid_address("2001:db8:0:0:0:0:0:1"));
        assert!(is_valid_address("2001:DB8::c0a8:1"));
        assert!(is_valid_address("1:2:3:4:5:6:7::"));

        assert!(!is_valid_address("1::2::3"));
        assert!(!is_valid_address(":::"));
        assert!(!is_valid_address("1:2:3:4:5:6:7:8:9"));
        assert!(!is_valid_address("1:2:3:4:5:6:7:8::"));
        assert!(!is_valid_address("12345::1"));
        assert!(!is_valid_address("fe80:::1"));
        assert!(!is_valid_address("g::1"));
    }

    #[test]
    fn garbage_is_rejected() {
        assert!(!is_valid_address(""));
        assert!(!is_valid_address("not-an-ip"));
        assert!(!is_valid_address("192.168.1.1 "));
        assert!(!is_valid_address("192,168,1,1"));
    }

    #[test]
    fn validation_is_deterministic() {
        for token in ["10.0.0.1", "::1", "300.0.0.1", "x"] {
            assert_eq!(is_valid_address(token), is_valid_address(token));
        }
    }

    #[test]
    fn cidr_parsing() {
        let cidr: CidrAddress = "192.168.0.10/24".parse().unwrap();
        assert_eq!(cidr.to_string(), "192.168.0.10/24");

        let cidr: CidrAddress = "2001:db8::10/64".parse().unwrap();
        assert_eq!(cidr.to_string(), "2001:db8::10/64");

        assert!(matches!(
            "192.168.0.10".parse::<CidrAddress>(),
            Err(CidrAddressParseError::NoDelimiter)
        ));
        assert!(matches!(
            "192.168.0.10/33".parse::<CidrAddress>(),
            Err(CidrAddressParseError::InvalidMask(None))
        ));
        assert!(matches!(
            "192.168.0.10/x".parse::<CidrAddress>(),
            Err(CidrAddressParseError::InvalidMask(Some(_)))
        ));
    }

    #[test]
    fn fqdn_construct() {
        use FqdnParseError::*;
        assert!(Fqdn::from("engine.example.com").is_ok());
        assert!(Fqdn::from("he-01.rutil.local").is_ok());

        assert_eq!(Fqdn::from("engine"), Err(MissingHostname));
        assert_eq!(Fqdn::from("-engine.com"), Err(InvalidPart("-engine".to_owned())));
        assert_eq!(Fqdn::from("engine..com"), Err(InvalidPart(String::new())));
        assert_eq!(Fqdn::from("123.com"), Err(NumericHostname));
    }

    #[test]
    fn fqdn_parts() {
        let fqdn = Fqdn::from("engine.rutil.local").unwrap();
        assert_eq!(fqdn.domain(), "rutil.local");
        assert_eq!(fqdn.to_string(), "engine.rutil.local");
    }
}
