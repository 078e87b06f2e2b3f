//! Join and unjoin registered clusters

use std::sync::Arc;

use clap::Args;
use kube::api::Api;
use kube::Client;
use meridian_cluster::{
    ClusterLifecycle, ClusterRegistration, KubeClusterRecordStore, KubeControlPlaneInstaller,
    KubeFederationMembership,
};
use meridian_common::cluster_client::{KubeClientRegistry, MemberClusterClientFactory};
use meridian_common::crd::MemberCluster;
use tokio_util::sync::CancellationToken;

use super::{shutdown_token, Context};
use crate::Result;

/// A registered cluster
#[derive(Args, Debug)]
pub struct MembershipArgs {
    /// Name of the MemberCluster record
    pub cluster: String,
}

fn registration(ctx: &Context, client: Client, cancel: CancellationToken) -> ClusterRegistration {
    let multicluster = &ctx.config.multicluster;
    let lifecycle = ClusterLifecycle::new(Arc::new(KubeFederationMembership::new(cancel.clone())));
    let installer = KubeControlPlaneInstaller::new(multicluster.federation.clone(), cancel);
    let store = KubeClusterRecordStore::new(client.clone(), multicluster.host_cluster_name.clone());
    let registry = KubeClientRegistry::new(Arc::new(MemberClusterClientFactory::new(client)));
    ClusterRegistration::new(
        lifecycle,
        Arc::new(installer),
        Arc::new(store),
        Arc::new(registry),
    )
}

async fn record(client: &Client, name: &str) -> Result<MemberCluster> {
    let api: Api<MemberCluster> = Api::all(client.clone());
    Ok(api.get(name).await.map_err(meridian_common::Error::from)?)
}

/// Run `join`
pub async fn join(ctx: &Context, args: MembershipArgs) -> Result<()> {
    let client = ctx.client().await?;
    let cluster = record(&client, &args.cluster).await?;
    registration(ctx, client, shutdown_token())
        .on_registered(&cluster)
        .await?;
    if cluster.hosts_control_plane() {
        println!("Control plane installed on {}.", args.cluster);
    } else {
        println!("Cluster {} joined.", args.cluster);
    }
    Ok(())
}

/// Run `unjoin`
pub async fn unjoin(ctx: &Context, args: MembershipArgs) -> Result<()> {
    let client = ctx.client().await?;
    let cluster = record(&client, &args.cluster).await?;
    registration(ctx, client, shutdown_token())
        .on_deregistered(&cluster)
        .await?;
    println!("Cluster {} unjoined.", args.cluster);
    Ok(())
}
