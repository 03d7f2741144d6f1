//! Show the resolved dependency tree of the project.
//!
//! ```bash
//! devflow resolve              # tree
//! devflow resolve --flat       # leaves first, the order actions run in
//! devflow resolve --dot | dot -Tsvg > deps.svg
//! ```

use anyhow::Result;
use clap::Args;
use colored::Colorize;
use std::collections::HashSet;
use std::sync::Arc;

use super::common::{CommandContext, DependencyArgs};
use crate::dependency::{Resolution, ResolvedDependency};

/// Resolve dependencies and print them
#[derive(Args, Debug)]
pub struct ResolveCommand {
    /// Print dependencies in execution order, one per line
    #[arg(long, conflicts_with = "dot")]
    flat: bool,

    /// Print the dependency graph in Graphviz DOT format
    #[arg(long)]
    dot: bool,

    #[command(flatten)]
    deps: DependencyArgs,
}

impl ResolveCommand {
    pub async fn execute(self, ctx: CommandContext) -> Result<()> {
        let mut resolver = ctx.resolver(&self.deps)?;
        let manager = ctx.manager(&self.deps);

        let spinner = ctx.spinner(format!("Resolving dependencies of {}", ctx.config.name));
        let result = manager.resolve_dependencies(&mut resolver, &ctx.project_dir, &ctx.config).await;
        spinner.finish_and_clear();
        let resolution = result?;
        tracing::debug!("Fetched {} project(s)", resolver.fetch_count());

        if self.dot {
            print!("{}", resolution.graph.to_dot());
        } else if self.flat {
            for line in flat_lines(resolution) {
                println!("{line}");
            }
        } else {
            println!("{}", ctx.config.name.bold());
            for line in tree_lines(&resolution.dependencies) {
                println!("{line}");
            }
        }
        Ok(())
    }
}

fn flat_lines(resolution: Resolution) -> Vec<String> {
    resolution
        .into_leaf_order()
        .into_iter()
        .map(|(id, node)| format!("{} {}", node.name, format!("({id})").dimmed()))
        .collect()
}

/// Box-drawing tree; shared dependencies are expanded once and marked `(*)` after.
fn tree_lines(dependencies: &[Arc<ResolvedDependency>]) -> Vec<String> {
    let mut lines = Vec::new();
    let mut seen = HashSet::new();
    push_tree(dependencies, "", &mut seen, &mut lines);
    lines
}

fn push_tree(
    dependencies: &[Arc<ResolvedDependency>],
    prefix: &str,
    seen: &mut HashSet<String>,
    lines: &mut Vec<String>,
) {
    for (index, dependency) in dependencies.iter().enumerate() {
        let last = index + 1 == dependencies.len();
        let branch = if last { "└── " } else { "├── " };
        let repeated = !seen.insert(dependency.id.clone());

        let mut line = format!("{prefix}{branch}{}", dependency.name);
        if repeated && !dependency.children.is_empty() {
            line.push_str(" (*)");
        }
        lines.push(line);

        if !repeated {
            let child_prefix = format!("{prefix}{}", if last { "    " } else { "│   " });
            push_tree(&dependency.children, &child_prefix, seen, lines);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_utils::resolved;

    #[test]
    fn test_tree_marks_shared_dependencies() {
        let leaf = resolved("db", "db", false, Vec::new());
        let cache = resolved("cache", "cache", false, vec![leaf]);
        let api = resolved("api", "api", true, vec![cache.clone()]);
        let web = resolved("web", "web", true, vec![cache]);

        let lines = tree_lines(&[api, web]);
        assert_eq!(
            lines,
            vec![
                "├── api",
                "│   └── cache",
                "│       └── db",
                "└── web",
                "    └── cache (*)",
            ]
        );
    }
}
