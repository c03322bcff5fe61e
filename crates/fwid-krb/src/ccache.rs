//! MIT credential cache (ccache) file format
//!
//! Decodes the `FILE:` credential cache written by MIT Kerberos and
//! compatible tools. Only the big-endian versions 3 and 4 are supported;
//! these are the only versions current tooling writes.
//!
//! See <https://web.mit.edu/kerberos/krb5-devel/doc/formats/ccache_file_format.html>

use bytes::{Buf, BufMut};

use crate::error::KrbError;

/// Smallest plausible credential cache: the version indicator (2 bytes),
/// no header, a minimal default principal (8 bytes) and one minimal
/// credential (59 bytes).
pub const MIN_CCACHE_LEN: usize = 69;

/// File format version 3 (no header)
pub const VERSION_3: u16 = 0x0503;

/// File format version 4 (tagged header)
pub const VERSION_4: u16 = 0x0504;

/// Header tag carrying the KDC clock offset
pub const HEADER_TAG_KDC_OFFSET: u16 = 1;

/// Service name component of a ticket-granting ticket
const TGT_SERVICE: &str = "krbtgt";

/// A Kerberos principal name with its realm
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Principal {
    /// Name type (e.g. 1 = principal, 2 = service instance)
    pub name_type: u32,
    /// Realm of the principal
    pub realm: String,
    /// Name components, e.g. `["krbtgt", "EXAMPLE.COM"]`
    pub components: Vec<String>,
}

impl Principal {
    /// Create a principal from its parts
    pub fn new(name_type: u32, realm: impl Into<String>, components: Vec<String>) -> Self {
        Self {
            name_type,
            realm: realm.into(),
            components,
        }
    }

    /// Whether this principal names the ticket-granting service of `realm`
    pub fn is_tgs_for(&self, realm: &str) -> bool {
        self.realm == realm
            && self.components.len() == 2
            && self.components[0] == TGT_SERVICE
            && self.components[1] == realm
    }
}

impl std::fmt::Display for Principal {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}@{}", self.components.join("/"), self.realm)
    }
}

/// A tagged field from a version 4 header
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HeaderField {
    pub tag: u16,
    pub value: Vec<u8>,
}

/// Session key of a credential
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct KeyBlock {
    pub enctype: u16,
    pub data: Vec<u8>,
}

/// Typed opaque value, used for addresses and authorization data
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TypedData {
    pub data_type: u16,
    pub data: Vec<u8>,
}

/// A single ticket entry
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Credential {
    pub client: Principal,
    pub server: Principal,
    pub key: KeyBlock,
    pub auth_time: u32,
    pub start_time: u32,
    pub end_time: u32,
    pub renew_till: u32,
    pub is_skey: bool,
    pub ticket_flags: u32,
    pub addresses: Vec<TypedData>,
    pub auth_data: Vec<TypedData>,
    pub ticket: Vec<u8>,
    pub second_ticket: Vec<u8>,
}

impl Credential {
    /// Effective start of the validity window as a unix timestamp.
    ///
    /// A zero start time means the ticket is valid from its auth time.
    pub fn start_unix(&self) -> i64 {
        if self.start_time == 0 {
            i64::from(self.auth_time)
        } else {
            i64::from(self.start_time)
        }
    }

    /// End of the validity window as a unix timestamp
    pub fn end_unix(&self) -> i64 {
        i64::from(self.end_time)
    }
}

/// A parsed credential cache
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CCache {
    pub version: u16,
    pub header: Vec<HeaderField>,
    pub default_principal: Principal,
    pub credentials: Vec<Credential>,
}

impl CCache {
    /// Parse a credential cache from the complete file contents
    pub fn parse(data: &[u8]) -> Result<Self, KrbError> {
        if data.len() < MIN_CCACHE_LEN {
            return Err(KrbError::TooShort {
                len: data.len(),
                min: MIN_CCACHE_LEN,
            });
        }

        let mut r = Reader::new(data);
        let version = r.u16("version")?;
        if version != VERSION_3 && version != VERSION_4 {
            return Err(KrbError::UnsupportedVersion(version));
        }

        let header = if version == VERSION_4 {
            r.header()?
        } else {
            Vec::new()
        };

        let default_principal = r.principal()?;

        let mut credentials = Vec::new();
        while r.has_remaining() {
            credentials.push(r.credential(version)?);
        }

        Ok(Self {
            version,
            header,
            default_principal,
            credentials,
        })
    }

    /// Find the ticket-granting ticket for `realm`.
    ///
    /// Looks up the `krbtgt/<REALM>@<REALM>` service principal.
    pub fn tgt(&self, realm: &str) -> Option<&Credential> {
        self.credentials.iter().find(|c| c.server.is_tgs_for(realm))
    }

    /// Encode the cache in its on-disk format.
    ///
    /// Writes exactly what [`CCache::parse`] reads, so a parsed cache can
    /// be written back unchanged.
    pub fn to_bytes(&self) -> Vec<u8> {
        let mut out = Vec::new();
        out.put_u16(self.version);
        if self.version == VERSION_4 {
            let len: usize = self.header.iter().map(|f| 4 + f.value.len()).sum();
            out.put_u16(len as u16);
            for field in &self.header {
                out.put_u16(field.tag);
                out.put_u16(field.value.len() as u16);
                out.put_slice(&field.value);
            }
        }
        put_principal(&mut out, &self.default_principal);
        for cred in &self.credentials {
            put_principal(&mut out, &cred.client);
            put_principal(&mut out, &cred.server);
            out.put_u16(cred.key.enctype);
            if self.version == VERSION_3 {
                out.put_u16(cred.key.enctype);
            }
            put_counted(&mut out, &cred.key.data);
            out.put_u32(cred.auth_time);
            out.put_u32(cred.start_time);
            out.put_u32(cred.end_time);
            out.put_u32(cred.renew_till);
            out.put_u8(u8::from(cred.is_skey));
            out.put_u32(cred.ticket_flags);
            for list in [&cred.addresses, &cred.auth_data] {
                out.put_u32(list.len() as u32);
                for item in list {
                    out.put_u16(item.data_type);
                    put_counted(&mut out, &item.data);
                }
            }
            put_counted(&mut out, &cred.ticket);
            put_counted(&mut out, &cred.second_ticket);
        }
        out
    }
}

fn put_counted(out: &mut Vec<u8>, data: &[u8]) {
    out.put_u32(data.len() as u32);
    out.put_slice(data);
}

fn put_principal(out: &mut Vec<u8>, p: &Principal) {
    out.put_u32(p.name_type);
    out.put_u32(p.components.len() as u32);
    put_counted(out, p.realm.as_bytes());
    for c in &p.components {
        put_counted(out, c.as_bytes());
    }
}

/// Bounds-checked big-endian reader over the cache contents
struct Reader<'a> {
    buf: &'a [u8],
}

impl<'a> Reader<'a> {
    fn new(buf: &'a [u8]) -> Self {
        Self { buf }
    }

    fn has_remaining(&self) -> bool {
        self.buf.has_remaining()
    }

    fn need(&self, field: &'static str, needed: usize) -> Result<(), KrbError> {
        if self.buf.remaining() < needed {
            return Err(KrbError::Truncated {
                field,
                needed,
                remaining: self.buf.remaining(),
            });
        }
        Ok(())
    }

    fn u8(&mut self, field: &'static str) -> Result<u8, KrbError> {
        self.need(field, 1)?;
        Ok(self.buf.get_u8())
    }

    fn u16(&mut self, field: &'static str) -> Result<u16, KrbError> {
        self.need(field, 2)?;
        Ok(self.buf.get_u16())
    }

    fn u32(&mut self, field: &'static str) -> Result<u32, KrbError> {
        self.need(field, 4)?;
        Ok(self.buf.get_u32())
    }

    fn bytes(&mut self, field: &'static str, len: usize) -> Result<Vec<u8>, KrbError> {
        self.need(field, len)?;
        let out = self.buf[..len].to_vec();
        self.buf.advance(len);
        Ok(out)
    }

    /// u32 length followed by that many bytes
    fn counted(&mut self, field: &'static str) -> Result<Vec<u8>, KrbError> {
        let len = self.u32(field)? as usize;
        self.bytes(field, len)
    }

    fn string(&mut self, field: &'static str) -> Result<String, KrbError> {
        let raw = self.counted(field)?;
        String::from_utf8(raw).map_err(|e| KrbError::InvalidField {
            field,
            reason: e.to_string(),
        })
    }

    /// Reject element counts that cannot fit in what is left
    fn count(&mut self, field: &'static str, min_elem: usize) -> Result<usize, KrbError> {
        let n = self.u32(field)? as usize;
        self.need(field, n.saturating_mul(min_elem))?;
        Ok(n)
    }

    fn header(&mut self) -> Result<Vec<HeaderField>, KrbError> {
        let len = self.u16("header length")? as usize;
        let raw = self.bytes("header", len)?;
        let mut inner = Reader::new(&raw);
        let mut fields = Vec::new();
        while inner.has_remaining() {
            let tag = inner.u16("header tag")?;
            let tag_len = inner.u16("header tag length")? as usize;
            let value = inner.bytes("header tag value", tag_len)?;
            fields.push(HeaderField { tag, value });
        }
        Ok(fields)
    }

    fn principal(&mut self) -> Result<Principal, KrbError> {
        let name_type = self.u32("principal name type")?;
        let n = self.count("principal components", 4)?;
        let realm = self.string("principal realm")?;
        let mut components = Vec::with_capacity(n);
        for _ in 0..n {
            components.push(self.string("principal component")?);
        }
        Ok(Principal {
            name_type,
            realm,
            components,
        })
    }

    fn typed_list(&mut self, field: &'static str) -> Result<Vec<TypedData>, KrbError> {
        let n = self.count(field, 6)?;
        let mut out = Vec::with_capacity(n);
        for _ in 0..n {
            let data_type = self.u16(field)?;
            let data = self.counted(field)?;
            out.push(TypedData { data_type, data });
        }
        Ok(out)
    }

    fn credential(&mut self, version: u16) -> Result<Credential, KrbError> {
        let client = self.principal()?;
        let server = self.principal()?;

        let enctype = self.u16("keyblock enctype")?;
        if version == VERSION_3 {
            // version 3 repeats the enctype
            self.u16("keyblock enctype")?;
        }
        let key = KeyBlock {
            enctype,
            data: self.counted("keyblock")?,
        };

        let auth_time = self.u32("authtime")?;
        let start_time = self.u32("starttime")?;
        let end_time = self.u32("endtime")?;
        let renew_till = self.u32("renew_till")?;
        let is_skey = self.u8("is_skey")? != 0;
        let ticket_flags = self.u32("ticket flags")?;
        let addresses = self.typed_list("addresses")?;
        let auth_data = self.typed_list("authdata")?;
        let ticket = self.counted("ticket")?;
        let second_ticket = self.counted("second ticket")?;

        Ok(Credential {
            client,
            server,
            key,
            auth_time,
            start_time,
            end_time,
            renew_till,
            is_skey,
            ticket_flags,
            addresses,
            auth_data,
            ticket,
            second_ticket,
        })
    }
}
