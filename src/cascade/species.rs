//! Fixed species vocabulary for the classification stage.
//!
//! Entries are formatted `"Scientific (Common)"`. A label without
//! parentheses is used as both the scientific and the common part.

/// Neotropical camera-trap vocabulary. Extend per region of interest.
pub const SPECIES_VOCABULARY: &[&str] = &[
    // Felids
    "Panthera onca (Jaguar)",
    "Puma concolor (Puma)",
    "Leopardus pardalis (Ocelot)",
    "Leopardus wiedii (Margay)",
    "Herpailurus yagouaroundi (Jaguarundi)",
    "Leopardus tigrinus (Oncilla)",
    // Wild ungulates
    "Tapirus terrestris (Lowland Tapir)",
    "Tapirus bairdii (Baird's Tapir)",
    "Pecari tajacu (Collared Peccary)",
    "Tayassu pecari (White-lipped Peccary)",
    "Mazama americana (Red Brocket Deer)",
    "Mazama gouazoubira (Gray Brocket Deer)",
    "Odocoileus virginianus (White-tailed Deer)",
    // Domestic livestock
    "Bos taurus (Cattle)",
    "Bos indicus (Zebu Cattle)",
    "Equus caballus (Horse)",
    "Equus asinus (Donkey)",
    "Sus scrofa domesticus (Domestic Pig)",
    "Ovis aries (Sheep)",
    "Capra hircus (Goat)",
    // Rodents
    "Cuniculus paca (Paca)",
    "Dasyprocta punctata (Central American Agouti)",
    "Dasyprocta fuliginosa (Black Agouti)",
    "Hydrochoerus hydrochaeris (Capybara)",
    "Sciurus igniventris (Northern Amazon Red Squirrel)",
    // Xenarthrans
    "Myrmecophaga tridactyla (Giant Anteater)",
    "Tamandua tetradactyla (Southern Tamandua)",
    "Tamandua mexicana (Northern Tamandua)",
    "Priodontes maximus (Giant Armadillo)",
    "Dasypus novemcinctus (Nine-banded Armadillo)",
    "Cabassous centralis (Northern Naked-tailed Armadillo)",
    // Small carnivores
    "Eira barbara (Tayra)",
    "Nasua nasua (South American Coati)",
    "Nasua narica (White-nosed Coati)",
    "Procyon cancrivorus (Crab-eating Raccoon)",
    "Procyon lotor (Northern Raccoon)",
    "Potos flavus (Kinkajou)",
    // Canids
    "Cerdocyon thous (Crab-eating Fox)",
    "Chrysocyon brachyurus (Maned Wolf)",
    "Speothos venaticus (Bush Dog)",
    "Canis lupus familiaris (Domestic Dog)",
    // Marsupials
    "Didelphis marsupialis (Common Opossum)",
    "Didelphis virginiana (Virginia Opossum)",
    // Primates
    "Cebus (Capuchin Monkey)",
    "Alouatta (Howler Monkey)",
    "Ateles (Spider Monkey)",
    "Saimiri (Squirrel Monkey)",
    "Lagothrix (Woolly Monkey)",
    // Ground birds
    "Crax (Curassow)",
    "Penelope (Guan)",
    "Ortalis (Chachalaca)",
    "Tinamus (Tinamou)",
    "Crypturellus (Tinamou)",
    "Odontophorus (Wood-Quail)",
    "Meleagris ocellata (Ocellated Turkey)",
    // Waterfowl
    "Cairina moschata (Muscovy Duck)",
    "Dendrocygna (Whistling-Duck)",
    "Anhinga anhinga (Anhinga)",
    // Reptiles
    "Iguana iguana (Green Iguana)",
    "Ctenosaura (Spiny-tailed Iguana)",
    "Caiman crocodilus (Spectacled Caiman)",
    "Crocodylus acutus (American Crocodile)",
    "Boa constrictor (Boa Constrictor)",
    "Chelonoidis carbonarius (Red-footed Tortoise)",
];

/// Split a vocabulary label into `(scientific, common)`. Labels without
/// parentheses yield the whole label for both parts.
pub fn split_label(label: &str) -> (String, String) {
    if let (Some(open), Some(close)) = (label.find('('), label.rfind(')')) {
        if open < close {
            let scientific = label[..open].trim();
            let common = label[open + 1..close].trim();
            if !scientific.is_empty() && !common.is_empty() {
                return (scientific.to_string(), common.to_string());
            }
        }
    }
    let whole = label.trim().to_string();
    (whole.clone(), whole)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_split_label_with_common_name() {
        let (scientific, common) = split_label("Panthera onca (Jaguar)");
        assert_eq!(scientific, "Panthera onca");
        assert_eq!(common, "Jaguar");
    }

    #[test]
    fn test_split_label_without_parentheses() {
        let (scientific, common) = split_label("Boa constrictor");
        assert_eq!(scientific, "Boa constrictor");
        assert_eq!(common, "Boa constrictor");
    }

    #[test]
    fn test_split_label_nested_parentheses_uses_outermost() {
        let (scientific, common) = split_label("Genus sp. (Some (odd) name)");
        assert_eq!(scientific, "Genus sp.");
        assert_eq!(common, "Some (odd) name");
    }

    #[test]
    fn test_vocabulary_labels_all_parse() {
        for label in SPECIES_VOCABULARY {
            let (scientific, common) = split_label(label);
            assert!(!scientific.is_empty());
            assert!(!common.is_empty());
        }
    }
}
