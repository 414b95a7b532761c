use pkg_types::rbac::PolicyRule;
use std::cell::RefCell;
use std::collections::HashMap;

use crate::chain::{ComposedChain, RoleSpec};
use crate::error::BuildError;

/// Flattens explicit template references into effective rule sets.
///
/// Chains are registered oldest first; a name in a later chain shadows the same
/// name in an earlier one, so a role always sees its own chain's definitions.
/// Effective rules are memoized per role once fully resolved.
#[derive(Debug, Default)]
pub struct Resolver<'a> {
    index: HashMap<&'a str, &'a RoleSpec>,
    resolved: RefCell<HashMap<&'a str, Vec<PolicyRule>>>,
}

impl<'a> Resolver<'a> {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_chain(mut self, chain: &'a ComposedChain) -> Self {
        for role in chain.roles() {
            self.index.insert(role.name.as_str(), role);
        }
        self.resolved.get_mut().clear();
        self
    }

    pub fn get(&self, name: &str) -> Option<&'a RoleSpec> {
        self.index.get(name).copied()
    }

    /// Direct rules of `name` followed by the depth-first effective rules of each
    /// referenced template. Duplicates are kept.
    pub fn effective_rules(&self, name: &str) -> Result<Vec<PolicyRule>, BuildError> {
        let role = self
            .get(name)
            .ok_or_else(|| BuildError::UnknownRole(name.to_string()))?;
        self.resolve(role, &mut Vec::new())
    }

    fn resolve(
        &self,
        role: &'a RoleSpec,
        stack: &mut Vec<&'a str>,
    ) -> Result<Vec<PolicyRule>, BuildError> {
        if let Some(rules) = self.resolved.borrow().get(role.name.as_str()) {
            return Ok(rules.clone());
        }
        if let Some(pos) = stack.iter().position(|n| *n == role.name) {
            let mut path: Vec<String> = stack[pos..].iter().map(|n| n.to_string()).collect();
            path.push(role.name.clone());
            return Err(BuildError::TemplateCycle { path });
        }
        stack.push(role.name.as_str());
        let mut out = role.rules.clone();
        for reference in &role.template_refs {
            let target = self
                .get(reference)
                .ok_or_else(|| BuildError::UnresolvedTemplate {
                    role: role.name.clone(),
                    reference: reference.clone(),
                })?;
            out.extend(self.resolve(target, stack)?);
        }
        stack.pop();
        self.resolved
            .borrow_mut()
            .insert(role.name.as_str(), out.clone());
        Ok(out)
    }
}
