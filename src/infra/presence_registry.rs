use rustc_hash::FxHashMap;
use tracing::debug;

use crate::model::{ConnectionId, Identity};

/// 在线绑定
#[derive(Debug, Clone)]
struct Binding {
    connection: ConnectionId,
    /// 首次绑定序号，用于保持快照的插入顺序
    seq: u64,
}

/// 绑定结果
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct BindOutcome {
    /// 该身份之前绑定的另一条连接（重绑后成为孤立连接）
    pub displaced_connection: Option<ConnectionId>,
    /// 该连接之前声明的另一个身份（已解除绑定）
    pub previous_identity: Option<Identity>,
}

/// 在线状态注册表
///
/// 维护 identity <-> connection 双向映射，两个方向对所有已绑定的对始终互逆：
/// - 同一身份重新绑定到新连接时覆盖旧绑定，旧连接的反向记录一并移除；
/// - 同一连接改报另一个身份时，旧身份的绑定被移除。
#[derive(Debug, Default)]
pub struct PresenceRegistry {
    /// identity -> Binding
    by_identity: FxHashMap<Identity, Binding>,
    /// 反向映射：connection -> identity
    by_connection: FxHashMap<ConnectionId, Identity>,
    next_seq: u64,
}

impl PresenceRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// 绑定身份与连接（无条件覆盖）
    pub fn bind(&mut self, identity: Identity, connection: ConnectionId) -> BindOutcome {
        let mut outcome = BindOutcome::default();

        // 连接改报身份：移除旧身份
        if let Some(previous) = self.by_connection.get(&connection) {
            if *previous != identity {
                let previous = previous.clone();
                self.by_identity.remove(&previous);
                debug!(
                    "🔁 PresenceRegistry: 连接 {} 由 {} 改报为 {}",
                    connection, previous, identity
                );
                outcome.previous_identity = Some(previous);
            }
        }

        let seq = match self.by_identity.get(&identity) {
            Some(existing) => {
                if existing.connection != connection {
                    self.by_connection.remove(&existing.connection);
                    outcome.displaced_connection = Some(existing.connection);
                }
                existing.seq
            }
            None => {
                self.next_seq += 1;
                self.next_seq
            }
        };

        self.by_identity.insert(
            identity.clone(),
            Binding { connection, seq },
        );
        self.by_connection.insert(connection, identity);

        outcome
    }

    /// 查询身份当前绑定的连接
    pub fn lookup(&self, identity: &Identity) -> Option<ConnectionId> {
        self.by_identity.get(identity).map(|binding| binding.connection)
    }

    /// 反查连接对应的身份
    pub fn lookup_identity(&self, connection: ConnectionId) -> Option<&Identity> {
        self.by_connection.get(&connection)
    }

    /// 按连接解除绑定，未知连接为 no-op
    pub fn unbind(&mut self, connection: ConnectionId) -> Option<Identity> {
        let identity = self.by_connection.remove(&connection)?;

        if let Some(binding) = self.by_identity.get(&identity) {
            if binding.connection == connection {
                self.by_identity.remove(&identity);
            }
        }

        Some(identity)
    }

    /// 在线快照，按身份首次绑定的顺序
    pub fn snapshot(&self) -> Vec<(Identity, ConnectionId)> {
        let mut entries: Vec<_> = self
            .by_identity
            .iter()
            .map(|(identity, binding)| (binding.seq, identity.clone(), binding.connection))
            .collect();
        entries.sort_unstable_by_key(|(seq, _, _)| *seq);
        entries
            .into_iter()
            .map(|(_, identity, connection)| (identity, connection))
            .collect()
    }

    pub fn is_bound(&self, identity: &Identity) -> bool {
        self.by_identity.contains_key(identity)
    }

    pub fn len(&self) -> usize {
        self.by_identity.len()
    }

    pub fn is_empty(&self) -> bool {
        self.by_identity.is_empty()
    }
}
