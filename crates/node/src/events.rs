use simnet::net::{ConfirmationId, PeerId};

#[derive(Debug, Clone)]
pub enum NodeEvent {
    StatusReceived {
        from: PeerId,
        tick: u32,
        peer_count: u16,
        label: Option<String>,
    },
    MessageReceived {
        from: PeerId,
        name: &'static str,
    },
    PeerJoined {
        peer: PeerId,
    },
    PeerLeft {
        peer: PeerId,
    },
    Abandoned {
        id: ConfirmationId,
        peer: PeerId,
    },
    Error {
        message: String,
    },
}

impl NodeEvent {
    pub fn describe(&self) -> String {
        match self {
            NodeEvent::StatusReceived {
                from,
                tick,
                peer_count,
                label,
            } => match label {
                Some(label) => format!(
                    "Status from {} ({}): tick {}, {} peers",
                    from, label, tick, peer_count
                ),
                None => format!("Status from {}: tick {}, {} peers", from, tick, peer_count),
            },
            NodeEvent::MessageReceived { from, name } => format!("{} from {}", name, from),
            NodeEvent::PeerJoined { peer } => format!("{} joined", peer),
            NodeEvent::PeerLeft { peer } => format!("{} left", peer),
            NodeEvent::Abandoned { id, peer } => {
                format!("Gave up on reliable packet {} to {}", id.0, peer)
            }
            NodeEvent::Error { message } => message.clone(),
        }
    }

    pub fn is_warning(&self) -> bool {
        matches!(self, NodeEvent::Abandoned { .. } | NodeEvent::PeerLeft { .. })
    }
}
