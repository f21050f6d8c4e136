//! Prost-based codec.

use std::collections::BTreeMap;

use crate::codec::XdsCodec;
use crate::error::{Error, Result};
use crate::message::{DiscoveryRequest, DiscoveryResponse, Node, ResourceAny};
use crate::proto::discovery;
use bytes::Bytes;
use prost::Message;

/// A codec that uses prost for serialization.
#[derive(Debug, Clone, Copy, Default)]
pub struct ProstCodec;

impl XdsCodec for ProstCodec {
    fn encode_request(&self, request: &DiscoveryRequest) -> Result<Bytes> {
        let proto_request = discovery::DiscoveryRequest {
            version_info: request.version_info.clone(),
            node: request.node.as_ref().map(encode_node),
            resource_names: request.resource_names.clone(),
            type_url: request.type_url.clone(),
            response_nonce: request.response_nonce.clone(),
            error_detail: request.error_detail.as_ref().map(|e| discovery::Status {
                code: e.code,
                message: e.message.clone(),
                details: vec![],
            }),
        };

        Ok(proto_request.encode_to_vec().into())
    }

    fn decode_response(&self, bytes: Bytes) -> Result<DiscoveryResponse> {
        let proto_response = discovery::DiscoveryResponse::decode(bytes).map_err(Error::Decode)?;

        Ok(DiscoveryResponse {
            version_info: proto_response.version_info,
            resources: proto_response
                .resources
                .into_iter()
                .map(|any| ResourceAny {
                    type_url: any.type_url,
                    value: any.value.into(),
                })
                .collect(),
            type_url: proto_response.type_url,
            nonce: proto_response.nonce,
        })
    }
}

fn encode_node(node: &Node) -> discovery::Node {
    discovery::Node {
        id: node.id.clone(),
        cluster: node.cluster.clone().unwrap_or_default(),
        metadata: Some(encode_metadata(&node.metadata)),
        locality: node.locality.as_ref().map(|l| discovery::Locality {
            region: l.region.clone(),
            zone: l.zone.clone(),
            sub_zone: l.sub_zone.clone(),
        }),
        user_agent_name: node.user_agent_name.clone(),
        user_agent_version_type: Some(discovery::node::UserAgentVersionType::UserAgentVersion(
            node.user_agent_version.clone(),
        )),
    }
}

fn encode_metadata(metadata: &BTreeMap<String, String>) -> prost_types::Struct {
    prost_types::Struct {
        fields: metadata
            .iter()
            .map(|(key, value)| {
                (
                    key.clone(),
                    prost_types::Value {
                        kind: Some(prost_types::value::Kind::StringValue(value.clone())),
                    },
                )
            })
            .collect(),
    }
}
