use schemars::JsonSchema;
use serde::{Deserialize, Serialize};

/// A prescription or specialty pharmacy order form
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize, JsonSchema)]
#[serde(default)]
pub struct Prescription {
    /// Date the prescription was written (YYYY-MM-DD)
    pub date_written: String,
    /// Date by which the medication is needed (YYYY-MM-DD)
    pub date_needed: String,
    /// Demographic and insurance details of the patient
    pub patient: Patient,
    /// The prescribing healthcare provider
    pub prescriber: Prescriber,
    /// Clinical diagnosis details associated with the prescription
    pub diagnosis: PatientDiagnosis,
    /// Additional clinical notes such as lab values, genetic markers or BSA
    pub clinical_info: Vec<String>,
    /// Medications prescribed on this form
    pub medications: Vec<Medication>,
    /// Whether the therapy is new, restarted or ongoing
    pub therapy_status: String,
    /// Prior therapies the patient tried and discontinued
    pub failed_therapies: Vec<TherapyHistory>,
    /// Shipping instructions for the medication
    pub delivery: DeliveryInfo,
    /// Signature date and DAW code from the prescriber
    pub prescriber_signature: SignatureInfo,
    /// Which supplemental documents accompany the form
    pub attachments: AttachmentDetails,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize, JsonSchema)]
#[serde(default)]
pub struct Patient {
    /// Patient's first name
    pub first_name: String,
    /// Patient's middle name
    pub middle_name: String,
    /// Patient's last name
    pub last_name: String,
    /// Patient's date of birth (YYYY-MM-DD)
    pub dob: String,
    /// Patient's biological sex (e.g. Male, Female, Other)
    pub sex: String,
    /// Recorded weight, in the units written on the form
    pub weight: Measurement,
    /// Recorded height, in the units written on the form
    pub height: Measurement,
    /// Residential address
    pub address: Address,
    /// Contact phone numbers
    pub phone_numbers: Vec<PhoneNumber>,
    /// Known allergies
    pub allergies: Vec<String>,
    /// Clearly designated emergency contact, if any
    pub emergency_contact: Contact,
    /// Insurance policies held by the patient
    pub insurance: Vec<Insurance>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize, JsonSchema)]
#[serde(default)]
pub struct Measurement {
    /// Unit the measurement was taken in
    pub unit: String,
    /// Recorded value of the measurement
    pub value: String,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize, JsonSchema)]
#[serde(default)]
pub struct Address {
    /// Street address
    pub street: String,
    /// City name
    pub city: String,
    /// Two-letter state abbreviation (e.g. NY, CA)
    pub state: String,
    /// ZIP or postal code
    pub zip: String,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize, JsonSchema)]
#[serde(default)]
pub struct PhoneNumber {
    /// Label for the number, e.g. Home, Mobile, Work
    pub label: String,
    /// Digits only, no spaces or punctuation
    pub number: String,
    /// Extension to dial, if any
    pub extension: String,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize, JsonSchema)]
#[serde(default)]
pub struct Contact {
    /// Full name of the contact person
    pub name: String,
    /// Relationship of the contact to the patient (e.g. spouse, parent)
    pub relationship: String,
    /// Phone number of the contact
    pub phone: String,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize, JsonSchema)]
#[serde(default)]
pub struct Insurance {
    /// Primary or Secondary
    #[serde(rename = "type")]
    pub kind: String,
    /// Name of the insurance provider
    pub provider: String,
    /// Member ID number
    pub id_number: String,
    /// Group number
    pub group_number: String,
    /// Prescription BIN
    pub rx_bin: String,
    /// Processor control number for pharmacy claims
    pub pcn: String,
    /// Full name of the policyholder
    pub policyholder_name: String,
    /// Policyholder date of birth (YYYY-MM-DD)
    pub policyholder_dob: String,
    /// Phone number of the insurance provider
    pub phone_number: String,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize, JsonSchema)]
#[serde(default)]
pub struct Prescriber {
    /// Full name of the prescriber
    pub name: String,
    /// Medical specialty (e.g. Oncology, Dermatology)
    pub specialty: String,
    /// National Provider Identifier
    pub npi: String,
    /// State license number
    pub state_license: String,
    /// DEA number for controlled substances
    pub dea: String,
    /// The prescriber's office or practice
    pub office: PrescriberOffice,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize, JsonSchema)]
#[serde(default)]
pub struct PrescriberOffice {
    /// Name of the office or medical facility
    pub name: String,
    /// Physical address of the office
    pub address: Address,
    /// Main office phone number
    pub phone: String,
    /// Office fax number
    pub fax: String,
    /// Designated office contact person
    pub contact_name: String,
    /// Email address of the office contact
    pub contact_email: String,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize, JsonSchema)]
#[serde(default)]
pub struct PatientDiagnosis {
    /// Date the diagnosis was made (YYYY-MM-DD)
    pub date_of_diagnosis: String,
    /// Diagnosis the medication is prescribed for
    pub primary_diagnosis: Diagnosis,
    /// Other relevant diagnoses
    pub additional_diagnoses: Vec<Diagnosis>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize, JsonSchema)]
#[serde(default)]
pub struct Diagnosis {
    /// Text description (e.g. Psoriatic Arthritis)
    pub description: String,
    /// ICD-10 code (e.g. L40.50)
    pub icd10_code: String,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize, JsonSchema)]
#[serde(default)]
pub struct Medication {
    /// Name of the prescribed drug
    pub drug_name: String,
    /// National Drug Code, only when printed on the form
    pub ndc: String,
    /// Dosage form (e.g. tablet, injection, packet)
    pub form: String,
    /// Drug strength (e.g. 40 mg/0.4 mL)
    pub strength: String,
    /// Administration instructions exactly as written
    pub sig: String,
    /// Amount to dispense
    pub quantity: String,
    /// Number of authorized refills
    pub refills: String,
    /// Date to begin the medication (YYYY-MM-DD)
    pub start_date: String,
    /// Intended treatment duration (e.g. 12 weeks)
    pub duration: String,
    /// Plain English reading of the sig
    pub administration_notes: String,
    /// Condition the drug is intended to treat
    pub indication: String,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize, JsonSchema)]
#[serde(default)]
pub struct TherapyHistory {
    /// Name of the previous therapy or medication
    pub name: String,
    /// Why the therapy was stopped
    pub reason_for_discontinuation: String,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize, JsonSchema)]
#[serde(default)]
pub struct DeliveryInfo {
    /// Where to ship (e.g. Patient's Home, Prescriber's Office)
    pub destination: String,
    /// Additional delivery instructions
    pub notes: String,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize, JsonSchema)]
#[serde(default)]
pub struct SignatureInfo {
    /// Date the prescriber signed (YYYY-MM-DD)
    pub date: String,
    /// Dispense As Written code (0 = substitution allowed, 1 = dispense as written)
    pub daw_code: String,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize, JsonSchema)]
#[serde(default)]
pub struct AttachmentDetails {
    /// Insurance card copy attached
    pub insurance_cards: bool,
    /// Recent laboratory results attached
    pub lab_results: bool,
    /// Pathology report attached
    pub pathology_reports: bool,
    /// Clinical or office notes attached
    pub clinical_notes: bool,
    /// Any other relevant documents attached
    pub other_documents: bool,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_missing_fields_default_to_empty() {
        let rx: Prescription =
            serde_json::from_str(r#"{"date_written":"2024-03-01","medications":[{"drug_name":"Humira"}]}"#)
                .unwrap();
        assert_eq!(rx.date_written, "2024-03-01");
        assert_eq!(rx.medications.len(), 1);
        assert_eq!(rx.medications[0].drug_name, "Humira");
        assert_eq!(rx.medications[0].sig, "");
        assert!(rx.patient.insurance.is_empty());
        assert!(!rx.attachments.lab_results);
    }

    #[test]
    fn test_insurance_kind_serializes_as_type() {
        let insurance = Insurance {
            kind: "Primary".to_string(),
            ..Default::default()
        };
        let value = serde_json::to_value(&insurance).unwrap();
        assert_eq!(value["type"], "Primary");
        assert!(value.get("kind").is_none());
    }
}
