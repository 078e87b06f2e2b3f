//! Query resources in member clusters

use std::sync::Arc;

use clap::Args;
use meridian_common::cluster_client::{KubeClientRegistry, MemberClusterClientFactory};
use meridian_resources::{builtin_lookup, ClusterTarget, Page, ResourceProcessor, ResourceQuery};

use super::Context;
use crate::Result;

/// Which member cluster and namespace to query
#[derive(Args, Debug)]
pub struct TargetArgs {
    /// Region of the member cluster
    #[arg(long)]
    pub region: String,

    /// Name of the member cluster
    #[arg(long)]
    pub cluster: String,

    /// Namespace; omit for cluster-scoped kinds
    #[arg(short, long, default_value = "")]
    pub namespace: String,
}

/// Show one resource
#[derive(Args, Debug)]
pub struct GetArgs {
    /// Kind, e.g. deployment or node
    pub kind: String,

    /// Object name
    pub name: String,

    #[command(flatten)]
    pub target: TargetArgs,
}

/// List resources
#[derive(Args, Debug)]
pub struct ListArgs {
    /// Kind, e.g. deployment or node
    pub kind: String,

    #[command(flatten)]
    pub target: TargetArgs,

    /// Label selector
    #[arg(short = 'l', long, default_value = "")]
    pub selector: String,

    /// Sort key (name or createTime), prefix with - for descending
    #[arg(long, allow_hyphen_values = true)]
    pub sort: Option<String>,

    /// Only objects whose name contains this
    #[arg(long)]
    pub name: Option<String>,

    /// Items to skip
    #[arg(long, default_value_t = 0)]
    pub offset: usize,

    /// Maximum items to return
    #[arg(long)]
    pub limit: Option<usize>,
}

impl ListArgs {
    fn query(&self) -> ResourceQuery {
        let page = match (self.offset, self.limit) {
            (0, None) => None,
            (offset, limit) => Some(Page {
                offset,
                limit: limit.unwrap_or(usize::MAX),
            }),
        };
        ResourceQuery {
            label_selector: self.selector.clone(),
            sort: self.sort.clone(),
            page,
            name: self.name.clone(),
        }
    }
}

async fn processor(ctx: &Context) -> Result<ResourceProcessor> {
    let client = ctx.client().await?;
    let registry = KubeClientRegistry::new(Arc::new(MemberClusterClientFactory::new(client)));
    Ok(ResourceProcessor::new(Arc::new(builtin_lookup(Arc::new(registry)))))
}

/// Run `get`
pub async fn get(ctx: &Context, args: GetArgs) -> Result<()> {
    let target = ClusterTarget::new(args.target.region, args.target.cluster);
    let object = processor(ctx)
        .await?
        .get(&target, &args.kind, &args.target.namespace, &args.name)
        .await?;
    println!("{}", serde_json::to_string_pretty(&object)?);
    Ok(())
}

/// Run `list`
pub async fn list(ctx: &Context, args: ListArgs) -> Result<()> {
    let target = ClusterTarget::new(args.target.region.clone(), args.target.cluster.clone());
    let result = processor(ctx)
        .await?
        .list(&target, &args.kind, &args.target.namespace, &args.query())
        .await?;
    println!("{}", serde_json::to_string_pretty(&result)?);
    Ok(())
}
