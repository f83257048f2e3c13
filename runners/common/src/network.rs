use crate::prelude::*;

/// The first and last third octet a namespace subnet may use. `.0` and `.255`
/// are never handed out.
const SUBNET_SLOTS: std::ops::RangeInclusive<u8> = 1..=254;

/// A subnet handed out to a namespace
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SubnetAllocation {
	/// The subnet in CIDR notation, e.g. `172.30.1.0/24`
	pub subnet: String,
	/// The gateway of the subnet, e.g. `172.30.1.1`
	pub gateway: String,
}

/// Finds the lowest free /24 inside the `base` /16 (e.g. `172.30`), given the
/// subnets already in use. Subnets outside the base are ignored.
///
/// This does not reserve anything. Callers must hold the namespace creation
/// lock from the moment they list the existing subnets until the new namespace
/// has been persisted.
pub fn allocate_subnet<'a>(
	base: &str,
	existing: impl IntoIterator<Item = &'a str>,
) -> Result<SubnetAllocation, ErrorType> {
	let prefix = format!("{base}.");
	let mut used = [false; 256];

	for subnet in existing {
		let Some(octet) = subnet
			.strip_prefix(&prefix)
			.and_then(|rest| rest.strip_suffix(".0/24"))
			.and_then(|octet| octet.parse::<u8>().ok())
		else {
			trace!("Ignoring subnet `{subnet}` outside of the pool");
			continue;
		};
		used[usize::from(octet)] = true;
	}

	let octet = SUBNET_SLOTS
		.into_iter()
		.find(|octet| !used[usize::from(*octet)])
		.ok_or(ErrorType::SubnetPoolExhausted)?;

	Ok(SubnetAllocation {
		subnet: format!("{base}.{octet}.0/24"),
		gateway: format!("{base}.{octet}.1"),
	})
}
