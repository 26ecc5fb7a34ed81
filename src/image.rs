use std::collections::BTreeMap;

use crate::config::FillPolicy;

/// Program image as handed over by the hex-to-binary conversion.
pub trait Image {
	fn read_byte(&self, address: usize) -> u8;

	fn has_byte(&self, address: usize) -> bool;

	/// One past the highest address that may be present.
	fn end(&self) -> usize;
}

/// Every address below `len()` is present.
#[derive(Clone, PartialEq, Eq, Debug)]
pub struct FlatImage(pub Vec<u8>);

impl FlatImage {
	pub fn len(&self) -> usize {
		self.0.len()
	}

	pub fn is_empty(&self) -> bool {
		self.0.is_empty()
	}
}

impl Image for FlatImage {
	fn read_byte(&self, address: usize) -> u8 {
		self.0[address]
	}

	fn has_byte(&self, address: usize) -> bool {
		address < self.0.len()
	}

	fn end(&self) -> usize {
		self.0.len()
	}
}

/// Only explicitly supplied addresses are present.
#[derive(Clone, PartialEq, Eq, Debug, Default)]
pub struct PatchImage {
	bytes: BTreeMap<usize, u8>,
}

impl PatchImage {
	pub fn new() -> Self {
		Self::default()
	}

	pub fn from_slice(base: usize, data: &[u8]) -> Self {
		let mut image = Self::new();
		image.insert_slice(base, data);
		image
	}

	pub fn insert(&mut self, address: usize, value: u8) {
		self.bytes.insert(address, value);
	}

	pub fn insert_slice(&mut self, base: usize, data: &[u8]) {
		// bytes past the end of the address space are dropped
		for (address, &b) in (base..=usize::MAX).zip(data) {
			self.bytes.insert(address, b);
		}
	}

	pub fn len(&self) -> usize {
		self.bytes.len()
	}

	pub fn is_empty(&self) -> bool {
		self.bytes.is_empty()
	}

	pub fn addresses<'a>(&'a self) -> impl Iterator<Item = usize> + 'a {
		self.bytes.keys().cloned()
	}
}

impl Image for PatchImage {
	fn read_byte(&self, address: usize) -> u8 {
		self.bytes.get(&address).cloned().unwrap_or(0)
	}

	fn has_byte(&self, address: usize) -> bool {
		self.bytes.contains_key(&address)
	}

	fn end(&self) -> usize {
		self.bytes.keys().next_back().map_or(0, |&a| a.saturating_add(1))
	}
}

/// Bytes of one flash block, taken from the image in a single pass.
#[derive(Clone, PartialEq, Eq, Debug)]
pub struct Block {
	pub index: usize,
	pub base: usize,
	// `None` where the image has no byte
	pub bytes: Vec<Option<u8>>,
}

impl Block {
	pub fn from_image<I: Image + ?Sized>(image: &I, index: usize, block_size: usize) -> Self {
		let base = index * block_size;
		let bytes = (base..base + block_size)
			.map(|address| if image.has_byte(address) { Some(image.read_byte(address)) } else { None })
			.collect();
		Block { index, base, bytes }
	}

	pub fn is_touched(&self) -> bool {
		self.bytes.iter().any(Option::is_some)
	}

	pub fn is_complete(&self) -> bool {
		self.bytes.iter().all(Option::is_some)
	}

	/// (offset, value) of every byte the row buffer has to receive.
	pub fn writes(&self, policy: FillPolicy) -> Vec<(u8, u8)> {
		self.bytes.iter()
			.enumerate()
			.filter_map(|(offset, b)| match (b, policy) {
				(Some(v), _) => Some((offset as u8, *v)),
				(None, FillPolicy::Zero) => Some((offset as u8, 0)),
				(None, FillPolicy::Preserve) => None,
			})
			.collect()
	}
}

#[cfg(test)]
mod tests {
	use super::*;

	#[test]
	fn flat_block_is_complete() {
		let image = FlatImage((0..200u32).map(|i| i as u8).collect());
		let block = Block::from_image(&image, 1, 64);
		assert_eq!(block.base, 64);
		assert!(block.is_complete());
		assert_eq!(block.bytes[0], Some(64));
		assert_eq!(block.bytes[63], Some(127));
	}

	#[test]
	fn short_image_leaves_holes() {
		let image = FlatImage(vec![1; 70]);
		let block = Block::from_image(&image, 1, 64);
		assert!(block.is_touched());
		assert!(!block.is_complete());
		assert_eq!(block.writes(FillPolicy::Zero).len(), 64);
		assert_eq!(block.writes(FillPolicy::Zero)[10], (10, 0));
		assert_eq!(block.writes(FillPolicy::Preserve), (0..6).map(|o| (o, 1)).collect::<Vec<_>>());
	}

	#[test]
	fn patch_image_is_sparse() {
		let mut image = PatchImage::from_slice(130, &[0xaa, 0xbb]);
		image.insert(5, 0x11);
		assert!(image.has_byte(130));
		assert!(!image.has_byte(129));
		assert_eq!(image.end(), 132);
		assert_eq!(image.addresses().collect::<Vec<_>>(), vec![5, 130, 131]);

		assert!(!Block::from_image(&image, 1, 64).is_touched());
		let block = Block::from_image(&image, 2, 64);
		assert_eq!(block.writes(FillPolicy::Preserve), vec![(2, 0xaa), (3, 0xbb)]);
	}

	#[test]
	fn patch_at_top_of_address_space() {
		let image = PatchImage::from_slice(usize::MAX - 1, &[1, 2, 3]);
		assert_eq!(image.len(), 2);
		assert!(image.has_byte(usize::MAX));
		assert_eq!(image.end(), usize::MAX);
	}
}
