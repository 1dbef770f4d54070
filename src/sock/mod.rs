//! Address types and raw socket operations.
//!
//! Everything in the crate that touches a file descriptor funnels through
//! this module: socket creation, option setup, bind/listen, the accept
//! syscall, TOS reflection, and NAPI-id introspection. Option handling
//! goes through `socket2` where it has coverage; the Linux-only options
//! (`TCP_SAVED_SYN`, `SO_ZEROCOPY`, `SO_INCOMING_NAPI_ID`, fast open) use
//! libc directly.
//!
//! This module uses unsafe code for the accept path and for get/setsockopt
//! calls that `socket2` does not cover. Each platform-gated helper has a
//! stub counterpart on unsupported targets so callers stay `cfg`-free.

#![allow(unsafe_code)]
#![allow(clippy::cast_possible_truncation, clippy::cast_sign_loss, clippy::cast_possible_wrap)]

use crate::error::{Error, ErrorKind, Result};
use crate::listener::config::ListenerConfig;
use crate::shutdown::ShutdownSet;
use crate::tracing_compat::{error, warn};
use socket2::{Domain, SockRef, Socket, Type};
use std::fmt;
use std::io;
use std::net::SocketAddr;
use std::os::fd::{AsRawFd, BorrowedFd, FromRawFd, OwnedFd, RawFd};
use std::path::{Path, PathBuf};
use std::sync::Arc;

// Older kernel/libc headers may lack these; the values are stable ABI.
#[cfg(target_os = "linux")]
const TCP_SAVE_SYN: libc::c_int = 27;
#[cfg(target_os = "linux")]
const TCP_SAVED_SYN: libc::c_int = 28;
#[cfg(target_os = "linux")]
const SO_INCOMING_NAPI_ID: libc::c_int = 56;
/// Kernel extension that disables transparent TLS offload on the socket.
#[cfg(target_os = "linux")]
const SO_NO_TRANSPARENT_TLS: libc::c_int = 200;

/// Address family of a listening socket.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum AddressFamily {
    /// IPv4.
    Inet,
    /// IPv6.
    Inet6,
    /// Unix domain.
    Unix,
    /// VM sockets (Linux).
    Vsock,
    /// Any other raw family value.
    Other(i32),
}

impl AddressFamily {
    /// Maps a raw `AF_*` value to a family.
    #[must_use]
    pub fn from_raw(raw: i32) -> Self {
        match raw {
            libc::AF_INET => Self::Inet,
            libc::AF_INET6 => Self::Inet6,
            libc::AF_UNIX => Self::Unix,
            #[cfg(target_os = "linux")]
            libc::AF_VSOCK => Self::Vsock,
            other => Self::Other(other),
        }
    }

    /// Returns the raw `AF_*` value.
    #[must_use]
    pub fn as_raw(self) -> i32 {
        match self {
            Self::Inet => libc::AF_INET,
            Self::Inet6 => libc::AF_INET6,
            Self::Unix => libc::AF_UNIX,
            Self::Vsock => vsock_raw(),
            Self::Other(raw) => raw,
        }
    }

    /// True for the IP families.
    #[must_use]
    pub const fn is_inet(self) -> bool {
        matches!(self, Self::Inet | Self::Inet6)
    }
}

#[cfg(target_os = "linux")]
const fn vsock_raw() -> i32 {
    libc::AF_VSOCK
}

#[cfg(not(target_os = "linux"))]
const fn vsock_raw() -> i32 {
    -1
}

/// A local or peer socket address.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Address {
    /// An IPv4 or IPv6 address.
    Inet(SocketAddr),
    /// A Unix-domain address; `None` for unnamed or abstract peers.
    Unix(Option<PathBuf>),
    /// The address could not be determined.
    Unspecified,
}

impl Address {
    /// Creates a Unix-domain address from a filesystem path.
    #[must_use]
    pub fn unix(path: impl Into<PathBuf>) -> Self {
        Self::Unix(Some(path.into()))
    }

    /// Returns the address family.
    #[must_use]
    pub fn family(&self) -> AddressFamily {
        match self {
            Self::Inet(sa) if sa.is_ipv4() => AddressFamily::Inet,
            Self::Inet(_) => AddressFamily::Inet6,
            Self::Unix(_) => AddressFamily::Unix,
            Self::Unspecified => AddressFamily::Other(libc::AF_UNSPEC),
        }
    }

    /// Returns the port for IP addresses.
    #[must_use]
    pub fn port(&self) -> Option<u16> {
        match self {
            Self::Inet(sa) => Some(sa.port()),
            _ => None,
        }
    }
}

impl From<SocketAddr> for Address {
    fn from(sa: SocketAddr) -> Self {
        Self::Inet(sa)
    }
}

impl fmt::Display for Address {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Inet(sa) => write!(f, "{sa}"),
            Self::Unix(Some(path)) => write!(f, "unix:{}", path.display()),
            Self::Unix(None) => f.write_str("unix:<unnamed>"),
            Self::Unspecified => f.write_str("<unspecified>"),
        }
    }
}

/// Creates a non-configured stream socket of the given family.
pub fn create(family: AddressFamily) -> Result<OwnedFd> {
    let domain = match family {
        AddressFamily::Inet => Domain::IPV4,
        AddressFamily::Inet6 => Domain::IPV6,
        AddressFamily::Unix => Domain::UNIX,
        #[cfg(target_os = "linux")]
        AddressFamily::Vsock => Domain::VSOCK,
        _ => {
            return Err(Error::with_context(
                ErrorKind::InvalidArgument,
                format!("unsupported address family {}", family.as_raw()),
            ))
        }
    };
    let socket = Socket::new(domain, Type::STREAM, None)
        .map_err(|e| Error::io(ErrorKind::SocketSetup, "error creating server socket", e))?;
    Ok(socket.into())
}

/// Applies the configured socket options, pre-bind.
///
/// Non-blocking mode and the requested `SO_REUSEPORT`, TOS-reflect, and
/// listener-TOS options are mandatory; every other option failure logs
/// and continues.
pub(crate) fn setup_socket(
    fd: BorrowedFd<'_>,
    family: AddressFamily,
    config: &ListenerConfig,
    shutdown_set: Option<&Arc<dyn ShutdownSet>>,
) -> Result<()> {
    let sock = SockRef::from(&fd);

    sock.set_nonblocking(true).map_err(|e| {
        Error::io(
            ErrorKind::SocketSetup,
            "failed to put socket in non-blocking mode",
            e,
        )
    })?;

    // AF_UNIX does not support SO_REUSEADDR.
    if family != AddressFamily::Unix && config.reuse_addr {
        if let Err(e) = sock.set_reuse_address(true) {
            error!(error = %e, "failed to set SO_REUSEADDR on server socket");
        }
    }

    if config.reuse_port {
        if let Err(e) = sock.set_reuse_port(true) {
            let described = local_address(fd)
                .map(|a| a.to_string())
                .unwrap_or_else(|_| String::from("<unknown>"));
            error!(error = %e, address = %described, "failed to set SO_REUSEPORT on server socket");
            return Err(Error::io(
                ErrorKind::SocketSetup,
                format!("failed to set SO_REUSEPORT on server socket: {described}"),
                e,
            ));
        }
    }

    if let Err(e) = sock.set_keepalive(config.keepalive) {
        error!(error = %e, "failed to set SO_KEEPALIVE on server socket");
    }

    if config.close_on_exec {
        if let Err(e) = sock.set_cloexec(true) {
            error!(error = %e, "failed to set FD_CLOEXEC on server socket");
        }
    }

    if family.is_inet() && config.nodelay {
        if let Err(e) = sock.set_nodelay(true) {
            error!(error = %e, "failed to set TCP_NODELAY on server socket");
        }
    }

    if config.tfo {
        if let Err(e) = enable_fast_open(fd, config.tfo_max_queue_size) {
            warn!(error = %e, "failed to set TCP_FASTOPEN on server socket");
        }
    }

    if config.zero_copy {
        if let Err(e) = set_zero_copy(fd, true) {
            warn!(error = %e, "failed to set SO_ZEROCOPY on server socket");
        }
    }

    if config.ip_freebind {
        if let Err(e) = set_freebind(fd) {
            error!(error = %e, "failed to set IP_FREEBIND on server socket");
        }
    }

    if config.no_transparent_tls {
        // Errors are fine; the extension is absent on most kernels.
        let _ = disable_transparent_tls(fd);
    }

    if config.tos_reflect && family.is_inet() && cfg!(target_os = "linux") {
        enable_save_syn(fd)
            .map_err(|e| Error::io(ErrorKind::SocketSetup, "failed to enable TOS reflect", e))?;
    }

    if config.listener_tos != 0 && family.is_inet() && cfg!(target_os = "linux") {
        set_tos(fd, family, config.listener_tos)
            .map_err(|e| Error::io(ErrorKind::SocketSetup, "failed to set TOS for socket", e))?;
    }

    if let Some(set) = shutdown_set {
        set.add(fd.as_raw_fd());
    }

    Ok(())
}

/// Binds `fd` to `addr`.
pub(crate) fn bind_addr(fd: BorrowedFd<'_>, addr: &Address) -> io::Result<()> {
    let sa = match addr {
        Address::Inet(sa) => socket2::SockAddr::from(*sa),
        Address::Unix(Some(path)) => socket2::SockAddr::unix(path)?,
        Address::Unix(None) | Address::Unspecified => {
            return Err(io::Error::new(
                io::ErrorKind::InvalidInput,
                "address cannot be bound",
            ))
        }
    };
    SockRef::from(&fd).bind(&sa)
}

/// Starts listening with the given backlog.
pub(crate) fn listen(fd: BorrowedFd<'_>, backlog: i32) -> io::Result<()> {
    SockRef::from(&fd).listen(backlog)
}

/// Restricts an IPv6 socket to IPv6 traffic only.
pub(crate) fn set_only_v6(fd: BorrowedFd<'_>) -> io::Result<()> {
    SockRef::from(&fd).set_only_v6(true)
}

/// Enables or disables `SO_REUSEADDR`.
pub(crate) fn set_reuse_addr(fd: BorrowedFd<'_>, on: bool) -> io::Result<()> {
    SockRef::from(&fd).set_reuse_address(on)
}

/// Half- or full-closes the socket without closing the descriptor.
pub(crate) fn shutdown(fd: BorrowedFd<'_>, how: std::net::Shutdown) -> io::Result<()> {
    SockRef::from(&fd).shutdown(how)
}

/// Returns the socket's local address.
pub(crate) fn local_address(fd: BorrowedFd<'_>) -> Result<Address> {
    let addr = SockRef::from(&fd)
        .local_addr()
        .map_err(|e| Error::io(ErrorKind::SocketSetup, "getsockname failed", e))?;
    Ok(from_sock_addr(&addr))
}

/// Returns the socket's address family, working for unbound sockets too.
pub(crate) fn family_of(fd: BorrowedFd<'_>) -> Result<AddressFamily> {
    let addr = SockRef::from(&fd)
        .local_addr()
        .map_err(|e| Error::io(ErrorKind::SocketSetup, "getsockname failed", e))?;
    Ok(AddressFamily::from_raw(i32::from(addr.family())))
}

fn from_sock_addr(addr: &socket2::SockAddr) -> Address {
    if let Some(sa) = addr.as_socket() {
        return Address::Inet(sa);
    }
    if i32::from(addr.family()) == libc::AF_UNIX {
        return Address::Unix(addr.as_pathname().map(Path::to_path_buf));
    }
    Address::Unspecified
}

/// [`accept`] on a raw descriptor captured at registration time.
///
/// The listener guarantees the descriptor outlives its registration, so
/// re-borrowing here is sound.
pub(crate) fn accept_raw(fd: RawFd, family: AddressFamily) -> io::Result<(OwnedFd, Address)> {
    let fd = unsafe { BorrowedFd::borrow_raw(fd) };
    accept(fd, family)
}

/// Accepts one connection, returning the child descriptor (already
/// non-blocking) and the peer address.
pub(crate) fn accept(fd: BorrowedFd<'_>, family: AddressFamily) -> io::Result<(OwnedFd, Address)> {
    let mut storage: libc::sockaddr_storage = unsafe { std::mem::zeroed() };
    // Some kernels do not update the family for unnamed peers; pre-fill it.
    storage.ss_family = family.as_raw() as libc::sa_family_t;
    let mut addr_len = std::mem::size_of::<libc::sockaddr_storage>() as libc::socklen_t;
    if family == AddressFamily::Unix {
        addr_len = std::mem::size_of::<libc::sockaddr_un>() as libc::socklen_t;
    }
    let saddr = std::ptr::addr_of_mut!(storage).cast::<libc::sockaddr>();

    #[cfg(target_os = "linux")]
    let raw = unsafe {
        libc::accept4(
            fd.as_raw_fd(),
            saddr,
            std::ptr::addr_of_mut!(addr_len),
            libc::SOCK_NONBLOCK,
        )
    };
    #[cfg(not(target_os = "linux"))]
    let raw = unsafe { libc::accept(fd.as_raw_fd(), saddr, std::ptr::addr_of_mut!(addr_len)) };

    if raw < 0 {
        return Err(io::Error::last_os_error());
    }
    let conn = unsafe { OwnedFd::from_raw_fd(raw) };
    #[cfg(not(target_os = "linux"))]
    SockRef::from(&conn).set_nonblocking(true)?;

    let peer = parse_sockaddr(&storage, addr_len);
    Ok((conn, peer))
}

fn parse_sockaddr(storage: &libc::sockaddr_storage, len: libc::socklen_t) -> Address {
    match i32::from(storage.ss_family) {
        libc::AF_INET => {
            let v4 = unsafe { &*std::ptr::from_ref(storage).cast::<libc::sockaddr_in>() };
            let ip = std::net::Ipv4Addr::from(u32::from_be(v4.sin_addr.s_addr));
            Address::Inet(SocketAddr::from((ip, u16::from_be(v4.sin_port))))
        }
        libc::AF_INET6 => {
            let v6 = unsafe { &*std::ptr::from_ref(storage).cast::<libc::sockaddr_in6>() };
            let ip = std::net::Ipv6Addr::from(v6.sin6_addr.s6_addr);
            Address::Inet(SocketAddr::V6(std::net::SocketAddrV6::new(
                ip,
                u16::from_be(v6.sin6_port),
                v6.sin6_flowinfo,
                v6.sin6_scope_id,
            )))
        }
        libc::AF_UNIX => parse_unix_sockaddr(storage, len),
        _ => Address::Unspecified,
    }
}

fn parse_unix_sockaddr(storage: &libc::sockaddr_storage, len: libc::socklen_t) -> Address {
    use std::ffi::OsString;
    use std::os::unix::ffi::OsStringExt;

    let addr = unsafe { &*std::ptr::from_ref(storage).cast::<libc::sockaddr_un>() };
    let family_size = std::mem::size_of::<libc::sa_family_t>();
    let len = len as usize;
    if len <= family_size {
        // Unnamed (autobind-less) peer.
        return Address::Unix(None);
    }
    let path_len = (len - family_size).min(addr.sun_path.len());
    let bytes: Vec<u8> = addr.sun_path[..path_len].iter().map(|&c| c as u8).collect();
    if bytes.first() == Some(&0) {
        // Abstract namespace.
        return Address::Unix(None);
    }
    let end = bytes.iter().position(|&b| b == 0).unwrap_or(bytes.len());
    Address::Unix(Some(PathBuf::from(OsString::from_vec(bytes[..end].to_vec()))))
}

fn setsockopt_int(fd: RawFd, level: libc::c_int, name: libc::c_int, value: libc::c_int) -> io::Result<()> {
    let ret = unsafe {
        libc::setsockopt(
            fd,
            level,
            name,
            std::ptr::from_ref(&value).cast(),
            std::mem::size_of::<libc::c_int>() as libc::socklen_t,
        )
    };
    if ret == 0 {
        Ok(())
    } else {
        Err(io::Error::last_os_error())
    }
}

/// Extracts the 6-bit DSCP/traffic-class value from the first word of a
/// saved SYN, read in network byte order.
#[must_use]
pub fn extract_tos(word0: u32, family: AddressFamily) -> u32 {
    match family {
        AddressFamily::Inet6 => (word0 & 0x0FC0_0000) >> 20,
        AddressFamily::Inet => (word0 & 0x00FC_0000) >> 16,
        _ => 0,
    }
}

/// Applies `IP_TOS` / `IPV6_TCLASS` for the family.
pub(crate) fn set_tos(fd: BorrowedFd<'_>, family: AddressFamily, tos: u32) -> io::Result<()> {
    let (level, name) = match family {
        AddressFamily::Inet => (libc::IPPROTO_IP, libc::IP_TOS),
        AddressFamily::Inet6 => (libc::IPPROTO_IPV6, libc::IPV6_TCLASS),
        _ => return Ok(()),
    };
    setsockopt_int(fd.as_raw_fd(), level, name, tos as libc::c_int)
}

/// Reads the saved SYN from an accepted socket and reflects its TOS onto
/// the socket, when non-zero.
#[cfg(target_os = "linux")]
pub(crate) fn reflect_tos(conn: BorrowedFd<'_>, family: AddressFamily) -> io::Result<()> {
    let mut buffer = [0u32; 64];
    let mut len = std::mem::size_of_val(&buffer) as libc::socklen_t;
    let ret = unsafe {
        libc::getsockopt(
            conn.as_raw_fd(),
            libc::IPPROTO_TCP,
            TCP_SAVED_SYN,
            buffer.as_mut_ptr().cast(),
            std::ptr::addr_of_mut!(len),
        )
    };
    if ret != 0 {
        return Err(io::Error::last_os_error());
    }
    let word0 = u32::from_be(buffer[0]);
    let tos = extract_tos(word0, family);
    if tos != 0 {
        set_tos(conn, family, tos)?;
    }
    Ok(())
}

#[cfg(not(target_os = "linux"))]
pub(crate) fn reflect_tos(_conn: BorrowedFd<'_>, _family: AddressFamily) -> io::Result<()> {
    Ok(())
}

/// Enables `TCP_SAVE_SYN` so accepted sockets expose the client SYN.
#[cfg(target_os = "linux")]
pub(crate) fn enable_save_syn(fd: BorrowedFd<'_>) -> io::Result<()> {
    setsockopt_int(fd.as_raw_fd(), libc::IPPROTO_TCP, TCP_SAVE_SYN, 1)
}

#[cfg(not(target_os = "linux"))]
pub(crate) fn enable_save_syn(_fd: BorrowedFd<'_>) -> io::Result<()> {
    Err(io::Error::from(io::ErrorKind::Unsupported))
}

/// Returns the NAPI id of the receive path that delivered this socket.
#[cfg(target_os = "linux")]
pub(crate) fn incoming_napi_id(fd: BorrowedFd<'_>) -> Option<u32> {
    let mut id: libc::c_int = 0;
    let mut len = std::mem::size_of::<libc::c_int>() as libc::socklen_t;
    let ret = unsafe {
        libc::getsockopt(
            fd.as_raw_fd(),
            libc::SOL_SOCKET,
            SO_INCOMING_NAPI_ID,
            std::ptr::addr_of_mut!(id).cast(),
            std::ptr::addr_of_mut!(len),
        )
    };
    if ret == 0 && id > 0 {
        Some(id as u32)
    } else {
        None
    }
}

#[cfg(not(target_os = "linux"))]
pub(crate) fn incoming_napi_id(_fd: BorrowedFd<'_>) -> Option<u32> {
    None
}

#[cfg(target_os = "linux")]
pub(crate) fn set_zero_copy(fd: BorrowedFd<'_>, on: bool) -> io::Result<()> {
    setsockopt_int(
        fd.as_raw_fd(),
        libc::SOL_SOCKET,
        libc::SO_ZEROCOPY,
        libc::c_int::from(on),
    )
}

#[cfg(not(target_os = "linux"))]
pub(crate) fn set_zero_copy(_fd: BorrowedFd<'_>, _on: bool) -> io::Result<()> {
    Err(io::Error::from(io::ErrorKind::Unsupported))
}

#[cfg(target_os = "linux")]
fn enable_fast_open(fd: BorrowedFd<'_>, queue: u32) -> io::Result<()> {
    setsockopt_int(
        fd.as_raw_fd(),
        libc::IPPROTO_TCP,
        libc::TCP_FASTOPEN,
        queue as libc::c_int,
    )
}

#[cfg(not(target_os = "linux"))]
fn enable_fast_open(_fd: BorrowedFd<'_>, _queue: u32) -> io::Result<()> {
    Err(io::Error::from(io::ErrorKind::Unsupported))
}

#[cfg(target_os = "linux")]
fn set_freebind(fd: BorrowedFd<'_>) -> io::Result<()> {
    setsockopt_int(fd.as_raw_fd(), libc::IPPROTO_IP, libc::IP_FREEBIND, 1)
}

#[cfg(not(target_os = "linux"))]
fn set_freebind(_fd: BorrowedFd<'_>) -> io::Result<()> {
    Err(io::Error::from(io::ErrorKind::Unsupported))
}

/// Marks the socket as exempt from transparent TLS offload.
#[cfg(target_os = "linux")]
fn disable_transparent_tls(fd: BorrowedFd<'_>) -> io::Result<()> {
    let ret = unsafe {
        libc::setsockopt(
            fd.as_raw_fd(),
            libc::SOL_SOCKET,
            SO_NO_TRANSPARENT_TLS,
            std::ptr::null(),
            0,
        )
    };
    if ret == 0 {
        Ok(())
    } else {
        Err(io::Error::last_os_error())
    }
}

#[cfg(not(target_os = "linux"))]
fn disable_transparent_tls(_fd: BorrowedFd<'_>) -> io::Result<()> {
    Ok(())
}

/// Binds the socket to a network device.
#[cfg(target_os = "linux")]
pub(crate) fn bind_device(fd: BorrowedFd<'_>, ifname: &str) -> io::Result<()> {
    SockRef::from(&fd).bind_device(Some(ifname.as_bytes()))
}

#[cfg(not(target_os = "linux"))]
pub(crate) fn bind_device(_fd: BorrowedFd<'_>, _ifname: &str) -> io::Result<()> {
    Err(io::Error::from(io::ErrorKind::Unsupported))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn tos_offsets_are_bit_exact() {
        // DSCP EF (0xB8) in an IPv4 header: version/IHL, then the TOS byte.
        assert_eq!(extract_tos(0x00B8_0000, AddressFamily::Inet), 0xB8);
        // Same class in an IPv6 header sits 4 bits higher.
        assert_eq!(extract_tos(0x0B80_0000, AddressFamily::Inet6), 0xB8);
        // Bits outside the 6-bit class (plus ECN) are masked off.
        assert_eq!(extract_tos(0x00FF_0000, AddressFamily::Inet), 0xFC);
        assert_eq!(extract_tos(0x0FF0_0000, AddressFamily::Inet6), 0xFC);
        // Non-IP families never reflect.
        assert_eq!(extract_tos(0xFFFF_FFFF, AddressFamily::Unix), 0);
    }

    #[test]
    fn family_raw_round_trip() {
        for family in [AddressFamily::Inet, AddressFamily::Inet6, AddressFamily::Unix] {
            assert_eq!(AddressFamily::from_raw(family.as_raw()), family);
        }
        assert_eq!(AddressFamily::from_raw(9999), AddressFamily::Other(9999));
    }

    #[test]
    fn parse_ipv4_sockaddr() {
        let mut storage: libc::sockaddr_storage = unsafe { std::mem::zeroed() };
        {
            let v4 = unsafe { &mut *std::ptr::addr_of_mut!(storage).cast::<libc::sockaddr_in>() };
            v4.sin_family = libc::AF_INET as libc::sa_family_t;
            v4.sin_port = 8080u16.to_be();
            v4.sin_addr.s_addr = u32::from(std::net::Ipv4Addr::new(127, 0, 0, 1)).to_be();
        }
        let len = std::mem::size_of::<libc::sockaddr_in>() as libc::socklen_t;
        let parsed = parse_sockaddr(&storage, len);
        assert_eq!(
            parsed,
            Address::Inet("127.0.0.1:8080".parse().expect("addr"))
        );
        assert_eq!(parsed.family(), AddressFamily::Inet);
        assert_eq!(parsed.port(), Some(8080));
    }

    #[test]
    fn parse_unnamed_unix_sockaddr() {
        let mut storage: libc::sockaddr_storage = unsafe { std::mem::zeroed() };
        storage.ss_family = libc::AF_UNIX as libc::sa_family_t;
        let len = std::mem::size_of::<libc::sa_family_t>() as libc::socklen_t;
        assert_eq!(parse_sockaddr(&storage, len), Address::Unix(None));
    }

    #[test]
    fn address_display_forms() {
        assert_eq!(
            Address::Inet("10.0.0.1:443".parse().expect("addr")).to_string(),
            "10.0.0.1:443"
        );
        assert_eq!(Address::unix("/tmp/x.sock").to_string(), "unix:/tmp/x.sock");
        assert_eq!(Address::Unix(None).to_string(), "unix:<unnamed>");
        assert_eq!(Address::Unspecified.to_string(), "<unspecified>");
    }
}
