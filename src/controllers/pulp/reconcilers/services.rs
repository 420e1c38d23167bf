use k8s_openapi::api::core::v1::{Service, ServicePort, ServiceSpec};
use k8s_openapi::apimachinery::pkg::util::intstr::IntOrString;

use super::definition::BuildContext;
use super::workloads::Workload;
use super::{component_labels, object_meta};

pub fn pulp_service(ctx: &BuildContext<'_>, workload: Workload) -> Service {
    let pulp = ctx.pulp;
    let name = match workload {
        Workload::Api => &ctx.names.api_service,
        Workload::Content => &ctx.names.content_service,
    };
    let mut labels = component_labels(pulp, workload.component());
    labels.insert("app".into(), format!("pulp-{}", workload.component()));

    Service {
        metadata: object_meta(pulp, name, labels.clone()),
        spec: Some(ServiceSpec {
            selector: Some(labels),
            ports: Some(vec![ServicePort {
                name: Some(workload.port_name()),
                port: workload.port(),
                protocol: Some("TCP".into()),
                target_port: Some(IntOrString::Int(workload.port())),
                ..Default::default()
            }]),
            type_: Some("ClusterIP".into()),
            session_affinity: Some("None".into()),
            internal_traffic_policy: Some("Cluster".into()),
            ip_family_policy: Some("SingleStack".into()),
            publish_not_ready_addresses: Some(true),
            ..Default::default()
        }),
        status: None,
    }
}
