//! PlantVillage disease label set.
//!
//! Class indices follow the dataset's sorted directory order, which is the
//! order of the classifier's output logits.

use crate::error::{PhytoscanError, Result};
use serde::{Deserialize, Serialize};
use std::fmt;

macro_rules! disease_classes {
    ($($variant:ident => $name:literal),+ $(,)?) => {
        /// One of the 38 crop/condition categories the classifier predicts.
        #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
        #[allow(missing_docs)]
        pub enum DiseaseClass {
            $(
                #[serde(rename = $name)]
                $variant,
            )+
        }

        impl DiseaseClass {
            /// Every class, in logit order.
            pub const ALL: &'static [DiseaseClass] = &[$(DiseaseClass::$variant),+];

            /// Dataset directory name, e.g. `Tomato___Late_blight`.
            pub fn name(&self) -> &'static str {
                match self {
                    $(DiseaseClass::$variant => $name,)+
                }
            }
        }
    };
}

disease_classes! {
    AppleScab => "Apple___Apple_scab",
    AppleBlackRot => "Apple___Black_rot",
    AppleCedarRust => "Apple___Cedar_apple_rust",
    AppleHealthy => "Apple___healthy",
    BlueberryHealthy => "Blueberry___healthy",
    CherryPowderyMildew => "Cherry_(including_sour)___Powdery_mildew",
    CherryHealthy => "Cherry_(including_sour)___healthy",
    CornGrayLeafSpot => "Corn_(maize)___Cercospora_leaf_spot Gray_leaf_spot",
    CornCommonRust => "Corn_(maize)___Common_rust_",
    CornNorthernLeafBlight => "Corn_(maize)___Northern_Leaf_Blight",
    CornHealthy => "Corn_(maize)___healthy",
    GrapeBlackRot => "Grape___Black_rot",
    GrapeEsca => "Grape___Esca_(Black_Measles)",
    GrapeLeafBlight => "Grape___Leaf_blight_(Isariopsis_Leaf_Spot)",
    GrapeHealthy => "Grape___healthy",
    OrangeCitrusGreening => "Orange___Haunglongbing_(Citrus_greening)",
    PeachBacterialSpot => "Peach___Bacterial_spot",
    PeachHealthy => "Peach___healthy",
    PepperBacterialSpot => "Pepper,_bell___Bacterial_spot",
    PepperHealthy => "Pepper,_bell___healthy",
    PotatoEarlyBlight => "Potato___Early_blight",
    PotatoLateBlight => "Potato___Late_blight",
    PotatoHealthy => "Potato___healthy",
    RaspberryHealthy => "Raspberry___healthy",
    SoybeanHealthy => "Soybean___healthy",
    SquashPowderyMildew => "Squash___Powdery_mildew",
    StrawberryLeafScorch => "Strawberry___Leaf_scorch",
    StrawberryHealthy => "Strawberry___healthy",
    TomatoBacterialSpot => "Tomato___Bacterial_spot",
    TomatoEarlyBlight => "Tomato___Early_blight",
    TomatoLateBlight => "Tomato___Late_blight",
    TomatoLeafMold => "Tomato___Leaf_Mold",
    TomatoSeptoriaLeafSpot => "Tomato___Septoria_leaf_spot",
    TomatoSpiderMites => "Tomato___Spider_mites Two-spotted_spider_mite",
    TomatoTargetSpot => "Tomato___Target_Spot",
    TomatoYellowLeafCurlVirus => "Tomato___Tomato_Yellow_Leaf_Curl_Virus",
    TomatoMosaicVirus => "Tomato___Tomato_mosaic_virus",
    TomatoHealthy => "Tomato___healthy",
}

const SEPARATOR: &str = "___";

impl DiseaseClass {
    /// Number of classes.
    pub const COUNT: usize = 38;

    /// Logit index of this class.
    pub fn index(&self) -> usize {
        *self as usize
    }

    /// Class at logit index `index`.
    pub fn from_index(index: usize) -> Result<Self> {
        Self::ALL.get(index).copied().ok_or_else(|| {
            PhytoscanError::InvalidInput(format!(
                "class index {} out of range 0..{}",
                index,
                Self::COUNT
            ))
        })
    }

    /// Look up a class by directory name.
    pub fn from_name(name: &str) -> Option<Self> {
        Self::ALL.iter().copied().find(|c| c.name() == name)
    }

    /// Crop part of the name, e.g. `Corn_(maize)`.
    pub fn crop(&self) -> &'static str {
        let name = self.name();
        name.split_once(SEPARATOR).map_or(name, |(crop, _)| crop)
    }

    /// Condition part of the name, e.g. `Common_rust_` or `healthy`.
    pub fn condition(&self) -> &'static str {
        let name = self.name();
        name.split_once(SEPARATOR).map_or(name, |(_, cond)| cond)
    }

    /// Whether this class denotes a healthy leaf.
    pub fn is_healthy(&self) -> bool {
        self.condition() == "healthy"
    }
}

impl fmt::Display for DiseaseClass {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}
