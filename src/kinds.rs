//! Node and relationship kinds
//!
//! Kind names serialize exactly as they appear in collected data
//! (`MemberOf`, `AZHasRole`, ...), so fixtures and persisted rows stay
//! readable.

use serde::{Deserialize, Serialize};
use std::fmt;

/// Node type tags. A node carries one platform base kind plus one or more of these.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub enum NodeKind {
    /// Base kind shared by every Active Directory node
    Base,
    User,
    Computer,
    Group,
    LocalGroup,
    LocalUser,
    OU,
    Container,
    Domain,
    GPO,
    EnterpriseCA,
    NTAuthStore,
    /// Base kind shared by every Azure node
    AZBase,
    AZUser,
    AZGroup,
    AZTenant,
    AZRole,
    AZApp,
    AZServicePrincipal,
    AZDevice,
}

impl NodeKind {
    pub fn is_azure(&self) -> bool {
        matches!(
            self,
            NodeKind::AZBase
                | NodeKind::AZUser
                | NodeKind::AZGroup
                | NodeKind::AZTenant
                | NodeKind::AZRole
                | NodeKind::AZApp
                | NodeKind::AZServicePrincipal
                | NodeKind::AZDevice
        )
    }
}

impl fmt::Display for NodeKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt::Debug::fmt(self, f)
    }
}

/// Relationship kinds, collected and derived
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub enum EdgeKind {
    // Membership and structure
    MemberOf,
    Contains,
    GPLink,
    TrustedBy,
    HasSession,
    MemberOfLocalGroup,
    LocalToComputer,
    RemoteInteractiveLogonRight,

    // Local group rights (collected directly or derived from local groups)
    AdminTo,
    CanRDP,
    CanPSRemote,
    ExecuteDCOM,
    SQLAdmin,
    AllowedToDelegate,
    AllowedToAct,

    // ACL rights
    GenericAll,
    GenericWrite,
    WriteDacl,
    OwnsRaw,
    WriteOwnerRaw,
    WriteGPLink,
    AllExtendedRights,
    ForceChangePassword,
    AddMember,
    AddSelf,
    ReadLAPSPassword,
    ReadGMSAPassword,
    AddKeyCredentialLink,
    AddAllowedToAct,
    WriteSPN,
    WriteAccountRestrictions,
    GetChanges,
    GetChangesAll,
    GetChangesInFilteredSet,

    // Certificate services
    HostsCAService,
    TrustedForNTAuth,
    NTAuthStoreFor,

    // Derived by post-processing
    DCSync,
    SyncLAPSPassword,
    Owns,
    WriteOwner,
    GPOAppliesTo,
    CanApplyGPO,
    HasTrustKeys,
    GoldenCert,
    CoerceAndRelayNTLMToSMB,

    // Azure
    AZContains,
    AZMemberOf,
    AZHasRole,
    AZGlobalAdmin,
    AZPrivilegedRoleAdmin,
    AZAddSecret,
    AZExecuteCommand,
}

impl fmt::Display for EdgeKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt::Debug::fmt(self, f)
    }
}

/// Edges that grant control over their end node
pub const ACL_CONTROL_KINDS: &[EdgeKind] = &[
    EdgeKind::GenericAll,
    EdgeKind::GenericWrite,
    EdgeKind::WriteDacl,
    EdgeKind::WriteOwner,
    EdgeKind::Owns,
    EdgeKind::AllExtendedRights,
    EdgeKind::ForceChangePassword,
    EdgeKind::AddMember,
    EdgeKind::AddSelf,
    EdgeKind::ReadLAPSPassword,
    EdgeKind::ReadGMSAPassword,
    EdgeKind::AddKeyCredentialLink,
    EdgeKind::AddAllowedToAct,
    EdgeKind::WriteSPN,
    EdgeKind::WriteAccountRestrictions,
    EdgeKind::WriteGPLink,
    EdgeKind::SyncLAPSPassword,
    EdgeKind::DCSync,
    EdgeKind::GetChanges,
    EdgeKind::GetChangesAll,
    EdgeKind::GetChangesInFilteredSet,
];

/// Edges that represent an observation of a computer's local groups
pub const LOCAL_GROUP_KINDS: &[EdgeKind] = &[
    EdgeKind::AdminTo,
    EdgeKind::CanRDP,
    EdgeKind::CanPSRemote,
    EdgeKind::ExecuteDCOM,
];

/// Rights that let a principal link a GPO to a container
pub const GPLINK_CONTROL_KINDS: &[EdgeKind] = &[
    EdgeKind::GenericAll,
    EdgeKind::GenericWrite,
    EdgeKind::WriteDacl,
    EdgeKind::WriteOwner,
    EdgeKind::Owns,
    EdgeKind::WriteGPLink,
];

impl EdgeKind {
    pub fn is_acl_control(&self) -> bool {
        ACL_CONTROL_KINDS.contains(self)
    }

    /// Kinds that only ever exist as post-processing output.
    ///
    /// Local group rights are absent here: they may be collected directly,
    /// so only edges flagged as derived are reconciled for them.
    pub fn is_post_processed(&self) -> bool {
        matches!(
            self,
            EdgeKind::DCSync
                | EdgeKind::SyncLAPSPassword
                | EdgeKind::Owns
                | EdgeKind::WriteOwner
                | EdgeKind::GPOAppliesTo
                | EdgeKind::CanApplyGPO
                | EdgeKind::HasTrustKeys
                | EdgeKind::GoldenCert
                | EdgeKind::CoerceAndRelayNTLMToSMB
                | EdgeKind::AZGlobalAdmin
                | EdgeKind::AZPrivilegedRoleAdmin
                | EdgeKind::AZAddSecret
                | EdgeKind::AZExecuteCommand
        )
    }
}
